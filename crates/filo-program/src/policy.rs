use serde::{Deserialize, Serialize};

/// Safety bounds applied to every program. Loaded once from the `[safety]`
/// config table; any omitted field takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Seconds.
    pub max_flight_time: f32,
    /// Centimetres above the takeoff point.
    pub max_altitude: f32,
    /// Centimetres per move command.
    pub max_distance: f32,
    /// Degrees per rotate command.
    pub max_rotation: f32,
    pub min_battery_percent: u8,
    /// Upper bound on the number of commands in one program.
    pub max_consecutive_moves: usize,
    /// Centimetres per second, used to turn distances into durations.
    pub max_speed: f32,
    pub require_takeoff_first: bool,
    pub require_land_last: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            max_flight_time: 120.0,
            max_altitude: 300.0,
            max_distance: 200.0,
            max_rotation: 360.0,
            min_battery_percent: 30,
            max_consecutive_moves: 50,
            max_speed: 50.0,
            require_takeoff_first: true,
            require_land_last: true,
        }
    }
}
