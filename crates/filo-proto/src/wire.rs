//! Line protocol spoken with the flight controller.
//!
//! Every frame is a single ASCII line terminated by `\n`:
//! - outbound: `CMD,<roll>,<pitch>,<throttle>,<yaw>`, `ARM`, `DISARM`, `STATUS`
//! - inbound: `TELEM,...`, `ACK,...`, `STATUS,...`, arm markers, alerts and
//!   free text diagnostics

use serde::{Deserialize, Serialize};
use std::fmt;

pub const TELEM_PREFIX: &str = "TELEM,";
pub const STATUS_PREFIX: &str = "STATUS,";
pub const ACK_PREFIX: &str = "ACK";
pub const ARM_OK: &str = "ARM_OK";
pub const ARMED: &str = "ARMED";
pub const ARM_FAIL_PREFIX: &str = "ARM_FAIL";
pub const PREARM_PREFIX: &str = "PREARM";
pub const ALERT_PREFIXES: [&str; 3] = ["🚨", "ALERT", "EMERGENCY"];

/// Throttle pulse width bounds understood by the FC (microseconds).
pub const THROTTLE_MIN: f32 = 1000.0;
pub const THROTTLE_MAX: f32 = 2000.0;

/// Attitude/throttle setpoint carried by a `CMD` frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    pub roll: f32,     // degrees
    pub pitch: f32,    // degrees
    pub throttle: f32, // microseconds
    pub yaw: f32,      // degrees/s
}

impl Setpoint {
    pub fn level(throttle: f32) -> Self {
        Self { roll: 0.0, pitch: 0.0, throttle, yaw: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    Cmd(Setpoint),
    Arm,
    Disarm,
    Status,
}

impl Frame {
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // the FC takes the throttle field at face value
            Frame::Cmd(sp) => write!(
                f,
                "CMD,{:.2},{:.2},{:.0},{:.2}",
                sp.roll,
                sp.pitch,
                sp.throttle.clamp(THROTTLE_MIN, THROTTLE_MAX),
                sp.yaw
            ),
            Frame::Arm => f.write_str("ARM"),
            Frame::Disarm => f.write_str("DISARM"),
            Frame::Status => f.write_str("STATUS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_frame_layout() {
        let f = Frame::Cmd(Setpoint { roll: -12.5, pitch: 3.0, throttle: 1499.6, yaw: 0.0 });
        assert_eq!(f.encode(), "CMD,-12.50,3.00,1500,0.00\n");
    }

    #[test]
    fn cmd_throttle_stays_in_pulse_range() {
        let high = Frame::Cmd(Setpoint::level(2350.0));
        assert_eq!(high.to_string(), "CMD,0.00,0.00,2000,0.00");
        let low = Frame::Cmd(Setpoint::level(640.0));
        assert_eq!(low.to_string(), "CMD,0.00,0.00,1000,0.00");
    }

    #[test]
    fn control_frames() {
        assert_eq!(Frame::Arm.encode(), "ARM\n");
        assert_eq!(Frame::Disarm.encode(), "DISARM\n");
        assert_eq!(Frame::Status.encode(), "STATUS\n");
    }
}
