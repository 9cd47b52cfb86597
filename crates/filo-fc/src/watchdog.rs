use filo_proto::telemetry::ConnectionStatus;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::state::FlightStateHandle;

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Operator silence tolerated while armed in manual mode.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_period_ms() -> u64 { 500 }
fn default_timeout_ms() -> u64 { 2000 }

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { period_ms: default_period_ms(), timeout_ms: default_timeout_ms() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// Operator went quiet; connection was just downgraded.
    Tripped,
    /// Still quiet, already reported.
    StillQuiet,
}

/// One watchdog evaluation at `now`. Only ever downgrades the connection
/// status; arming and autonomous mode are left untouched.
pub fn check(state: &FlightStateHandle, now: Instant, timeout: Duration) -> Verdict {
    state.update(|st| {
        let quiet = now.saturating_duration_since(st.last_operator_command) > timeout;
        if !(st.armed && !st.autonomous_mode && quiet) {
            return Verdict::Ok;
        }
        if st.telemetry.connection == ConnectionStatus::Warning {
            return Verdict::StillQuiet;
        }
        st.telemetry.connection = ConnectionStatus::Warning;
        Verdict::Tripped
    })
}

pub async fn run_watchdog(state: FlightStateHandle, cfg: WatchdogConfig) {
    let timeout = Duration::from_millis(cfg.timeout_ms);
    let mut tick = tokio::time::interval(Duration::from_millis(cfg.period_ms.max(10)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let now = tick.tick().await;
        if check(&state, now, timeout) == Verdict::Tripped {
            warn!("watchdog: no operator commands for {:?}, connection may be lost", timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn trips_only_when_armed_manual_and_quiet() {
        let st = FlightStateHandle::new();
        st.touch_operator();
        let t0 = Instant::now();

        // disarmed: never trips
        assert_eq!(check(&st, t0 + Duration::from_secs(5), TIMEOUT), Verdict::Ok);

        st.set_armed(true);
        assert_eq!(check(&st, t0 + Duration::from_secs(1), TIMEOUT), Verdict::Ok);
        assert_eq!(check(&st, t0 + Duration::from_secs(3), TIMEOUT), Verdict::Tripped);
        assert_eq!(check(&st, t0 + Duration::from_secs(4), TIMEOUT), Verdict::StillQuiet);
        assert_eq!(st.telemetry().connection, ConnectionStatus::Warning);

        // purely observational
        assert!(st.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn autonomous_mode_is_exempt() {
        let st = FlightStateHandle::new();
        st.touch_operator();
        st.set_armed(true);
        st.enter_autonomous();
        let later = Instant::now() + Duration::from_secs(10);
        assert_eq!(check(&st, later, TIMEOUT), Verdict::Ok);
        assert_eq!(st.telemetry().connection, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_downgrades_connection() {
        let st = FlightStateHandle::new();
        st.set_connection(ConnectionStatus::Connected);
        st.touch_operator();
        st.set_armed(true);

        let task = tokio::spawn(run_watchdog(st.clone(), WatchdogConfig::default()));
        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(st.telemetry().connection, ConnectionStatus::Warning);
        task.abort();
    }
}
