use filo_proto::telemetry::{ConnectionStatus, TelemetrySample};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;

/// Resolution slot for the arm handshake, written by the telemetry decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmResult {
    #[default]
    None,
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct FlightState {
    pub armed: bool,
    /// While set, only the execution engine may write to the FC.
    pub autonomous_mode: bool,
    pub telemetry: TelemetrySample,
    pub last_operator_command: Instant,
    pub pending_arm_result: ArmResult,
}

impl Default for FlightState {
    fn default() -> Self {
        Self {
            armed: false,
            autonomous_mode: false,
            telemetry: TelemetrySample::default(),
            last_operator_command: Instant::now(),
            pending_arm_result: ArmResult::None,
        }
    }
}

/// Serializable view of [`FlightState`] for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct FlightSnapshot {
    pub ts_unix_ms: i64,
    pub armed: bool,
    pub autonomous: bool,
    pub telemetry: TelemetrySample,
    pub operator_idle_ms: u64,
    pub pending_arm_result: ArmResult,
}

/// Cloneable handle to the process-wide flight state.
///
/// Every logical update takes the lock exactly once, so readers never observe
/// half of a telemetry line. The lock is never held across an `.await`.
#[derive(Debug, Clone)]
pub struct FlightStateHandle {
    inner: Arc<Mutex<FlightState>>,
    arm_tx: Arc<watch::Sender<ArmResult>>,
}

impl Default for FlightStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightStateHandle {
    pub fn new() -> Self {
        let (arm_tx, _) = watch::channel(ArmResult::None);
        Self {
            inner: Arc::new(Mutex::new(FlightState::default())),
            arm_tx: Arc::new(arm_tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlightState> {
        // A panicked writer leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` under a single lock acquisition.
    pub fn update<R>(&self, f: impl FnOnce(&mut FlightState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn get(&self) -> FlightState {
        self.lock().clone()
    }

    pub fn telemetry(&self) -> TelemetrySample {
        self.lock().telemetry.clone()
    }

    pub fn snapshot(&self) -> FlightSnapshot {
        let st = self.lock();
        FlightSnapshot {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            armed: st.armed,
            autonomous: st.autonomous_mode,
            telemetry: st.telemetry.clone(),
            operator_idle_ms: st.last_operator_command.elapsed().as_millis() as u64,
            pending_arm_result: st.pending_arm_result,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    pub fn is_autonomous(&self) -> bool {
        self.lock().autonomous_mode
    }

    /// Take exclusive control for a program. Returns false if a program
    /// already holds it.
    pub fn enter_autonomous(&self) -> bool {
        let mut st = self.lock();
        if st.autonomous_mode {
            return false;
        }
        st.autonomous_mode = true;
        true
    }

    pub fn leave_autonomous(&self) {
        self.lock().autonomous_mode = false;
    }

    pub fn set_armed(&self, armed: bool) {
        let mut st = self.lock();
        st.armed = armed;
        st.telemetry.armed = armed;
    }

    /// Disarm and drop out of autonomous mode in one step.
    pub fn force_disarm(&self) {
        let mut st = self.lock();
        st.armed = false;
        st.telemetry.armed = false;
        st.autonomous_mode = false;
    }

    pub fn set_connection(&self, connection: ConnectionStatus) {
        self.lock().telemetry.connection = connection;
    }

    pub fn touch_operator(&self) {
        self.lock().last_operator_command = Instant::now();
    }

    pub fn clear_arm_result(&self) {
        self.lock().pending_arm_result = ArmResult::None;
        self.arm_tx.send_replace(ArmResult::None);
    }

    pub fn resolve_arm(&self, result: ArmResult) {
        self.lock().pending_arm_result = result;
        self.arm_tx.send_replace(result);
    }

    pub fn subscribe_arm(&self) -> watch::Receiver<ArmResult> {
        self.arm_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomous_is_exclusive() {
        let st = FlightStateHandle::new();
        assert!(st.enter_autonomous());
        assert!(!st.enter_autonomous());
        st.leave_autonomous();
        assert!(st.enter_autonomous());
    }

    #[test]
    fn force_disarm_clears_both_flags() {
        let st = FlightStateHandle::new();
        st.set_armed(true);
        st.enter_autonomous();
        st.force_disarm();
        let s = st.get();
        assert!(!s.armed);
        assert!(!s.telemetry.armed);
        assert!(!s.autonomous_mode);
    }

    #[test]
    fn arm_resolution_reaches_subscribers() {
        let st = FlightStateHandle::new();
        st.clear_arm_result();
        let rx = st.subscribe_arm();
        st.resolve_arm(ArmResult::Failure);
        assert_eq!(*rx.borrow(), ArmResult::Failure);
        assert_eq!(st.get().pending_arm_result, ArmResult::Failure);
    }
}
