use filo_proto::telemetry::TelemetrySample;
use serde::Serialize;

use crate::command::{Command, Program};
use crate::policy::SafetyPolicy;

/// Altitude after takeoff in the simulated trace, cm.
pub const TAKEOFF_ALTITUDE: f32 = 100.0;
/// Altitude change per climbing/descending move in the simulated trace, cm.
pub const ALTITUDE_STEP: f32 = 20.0;
pub const CLIMB_ABOVE: f32 = 1450.0;
pub const DESCEND_BELOW: f32 = 1350.0;
/// Ground speed assumed when estimating distance from duration, cm/s.
pub const SPEED_ESTIMATE: f32 = 50.0;
pub const MAX_TILT: f32 = 30.0;
pub const MAX_YAW: f32 = 45.0;
pub const MAX_THROTTLE: f32 = 1800.0;
pub const LOW_THROTTLE: f32 = 1100.0;
pub const LOW_THROTTLE_ALTITUDE: f32 = 50.0;
pub const LONG_MOVE: f32 = 30.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self { valid: errors.is_empty(), errors, warnings }
    }
}

/// Judge a program against the policy and a telemetry snapshot.
///
/// Every check runs; failures accumulate so one report can list several
/// problems. Messages about a single command carry its 1-based position.
pub fn validate(program: &Program, telemetry: &TelemetrySample, policy: &SafetyPolicy) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let cmds = program.commands();

    if telemetry.battery_percent < policy.min_battery_percent {
        errors.push(format!(
            "battery {}% is below the minimum {}%",
            telemetry.battery_percent, policy.min_battery_percent
        ));
    }

    if cmds.len() > policy.max_consecutive_moves {
        errors.push(format!(
            "program has {} commands, limit is {}",
            cmds.len(),
            policy.max_consecutive_moves
        ));
    }

    if policy.require_takeoff_first && !matches!(cmds.first(), Some(Command::Takeoff { .. })) {
        let found = cmds.first().map(Command::name).unwrap_or("nothing");
        errors.push(format!("program must start with takeoff (found {})", found));
    }

    if policy.require_land_last && !cmds.last().is_some_and(Command::is_terminal) {
        let found = cmds.last().map(Command::name).unwrap_or("nothing");
        errors.push(format!("program must end with land or emergency (found {})", found));
    }

    let flight_time = program.estimated_flight_time();
    if flight_time > policy.max_flight_time {
        errors.push(format!(
            "estimated flight time {:.1}s exceeds limit {:.1}s",
            flight_time, policy.max_flight_time
        ));
    }

    let mut altitude: f32 = 0.0;
    let mut altitude_reported = false;
    let mut total_distance: f32 = 0.0;

    for (i, cmd) in cmds.iter().enumerate() {
        let n = i + 1;
        let d = cmd.duration();
        if !(d.is_finite() && d >= 0.0) {
            errors.push(format!("command {}: invalid {} duration {}", n, cmd.name(), d));
        }
        match cmd {
            Command::Takeoff { .. } => altitude = TAKEOFF_ALTITUDE,
            Command::Land { .. } => altitude = 0.0,
            Command::Move { roll, pitch, throttle, yaw, duration } => {
                if *throttle > CLIMB_ABOVE {
                    altitude += ALTITUDE_STEP;
                } else if *throttle < DESCEND_BELOW {
                    altitude -= ALTITUDE_STEP;
                }

                let distance = duration * SPEED_ESTIMATE;
                total_distance += distance;
                if distance > policy.max_distance {
                    errors.push(format!(
                        "command {}: distance ~{:.0}cm exceeds limit {:.0}cm",
                        n, distance, policy.max_distance
                    ));
                }
                if pitch.abs() > MAX_TILT {
                    errors.push(format!("command {}: pitch {:.1}° exceeds ±{:.0}°", n, pitch, MAX_TILT));
                }
                if roll.abs() > MAX_TILT {
                    errors.push(format!("command {}: roll {:.1}° exceeds ±{:.0}°", n, roll, MAX_TILT));
                }
                if *throttle > MAX_THROTTLE {
                    errors.push(format!("command {}: throttle {:.0} exceeds {:.0}", n, throttle, MAX_THROTTLE));
                }
                if *throttle < LOW_THROTTLE && altitude > LOW_THROTTLE_ALTITUDE {
                    warnings.push(format!(
                        "command {}: throttle {:.0} at ~{:.0}cm may drop too fast",
                        n, throttle, altitude
                    ));
                }
                if yaw.abs() > MAX_YAW {
                    errors.push(format!("command {}: yaw {:.1}°/s exceeds ±{:.0}°/s", n, yaw, MAX_YAW));
                }
                if *duration > LONG_MOVE {
                    warnings.push(format!("command {}: long move ({:.1}s)", n, duration));
                }
            }
            _ => {}
        }

        if !altitude_reported && altitude > policy.max_altitude {
            altitude_reported = true;
            errors.push(format!(
                "command {}: simulated altitude {:.0}cm exceeds limit {:.0}cm",
                n, altitude, policy.max_altitude
            ));
        }
    }

    if total_distance > 3.0 * policy.max_distance {
        warnings.push(format!(
            "total horizontal distance ~{:.0}cm is more than 3x the per-move limit ({:.0}cm)",
            total_distance, policy.max_distance
        ));
    }

    ValidationReport::new(errors, warnings)
}
