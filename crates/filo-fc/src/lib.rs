pub mod arm;
pub mod decode;
pub mod ingest;
pub mod link;
pub mod state;
pub mod watchdog;

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// Serial device of the flight controller, e.g. "/dev/serial0" or "COM10".
    pub serial_dev: String,

    /// FC firmware talks 250000 baud by default.
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// How long an operator arm request waits for ARM_OK / ARM_FAIL.
    pub arm_timeout_ms: Option<u64>,

    /// Pause before retrying after a serial read error.
    pub read_backoff_ms: Option<u64>,
}

fn default_baud() -> u32 {
    250_000
}

impl FcConfig {
    pub fn arm_timeout(&self) -> Duration {
        self.arm_timeout_ms.map(Duration::from_millis).unwrap_or(arm::DEFAULT_ARM_TIMEOUT)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms.unwrap_or(1000))
    }
}
