use anyhow::Result;
use crate::policy::SafetyPolicy;
use crate::validate::TAKEOFF_ALTITUDE;

pub fn check_policy(p: &SafetyPolicy) -> Result<()> {
    anyhow::ensure!(p.max_speed > 0.0, "safety.max_speed must be > 0");
    anyhow::ensure!(p.max_flight_time > 0.0, "safety.max_flight_time must be > 0");
    anyhow::ensure!(p.max_distance > 0.0, "safety.max_distance must be > 0");
    anyhow::ensure!(p.max_rotation > 0.0, "safety.max_rotation must be > 0");
    anyhow::ensure!(p.max_altitude >= TAKEOFF_ALTITUDE, "safety.max_altitude below takeoff height ({}cm)", TAKEOFF_ALTITUDE);
    anyhow::ensure!(p.min_battery_percent <= 100, "safety.min_battery_percent should be 0..100");
    anyhow::ensure!(p.max_consecutive_moves >= 2, "safety.max_consecutive_moves too small for takeoff+land");
    Ok(())
}
