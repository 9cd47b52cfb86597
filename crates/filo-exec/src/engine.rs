use filo_fc::link::{FcLink, LinkError};
use filo_program::command::{Command, CRUISE_THROTTLE};
use filo_program::{Program, SafetyPolicy};
use filo_proto::wire::{Frame, Setpoint};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Live battery level below which a running program is always brought down,
/// whatever the policy says.
pub const BATTERY_FLOOR: u8 = 20;
/// Live attitude beyond which a move is abandoned, degrees.
pub const MAX_LIVE_TILT: f32 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecState {
    Idle,
    TakeoffSeq,
    Running,
    EmergencyLanding,
    Completed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct ExecTiming {
    /// Move frame period (20 Hz).
    pub tick: Duration,
    pub arm_settle: Duration,
    pub takeoff_pace: Duration,
    pub land_pace: Duration,
    pub emergency_pace: Duration,
}

impl Default for ExecTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            arm_settle: Duration::from_secs(2),
            takeoff_pace: Duration::from_millis(100),
            land_pace: Duration::from_millis(150),
            emergency_pace: Duration::from_millis(300),
        }
    }
}

/// Throttle schedules, µs: (from, to, step).
pub const TAKEOFF_RAMP: (f32, f32, f32) = (1100.0, CRUISE_THROTTLE, 50.0);
pub const LAND_RAMP: (f32, f32, f32) = (CRUISE_THROTTLE, 1000.0, 50.0);
pub const EMERGENCY_RAMP: (f32, f32, f32) = (1300.0, 1000.0, 100.0);

/// Inclusive throttle steps from `from` towards `to`.
pub fn ramp((from, to, step): (f32, f32, f32)) -> Vec<f32> {
    let n = ((to - from).abs() / step).round() as usize;
    let dir = if to >= from { 1.0 } else { -1.0 };
    (0..=n).map(|i| from + dir * step * i as f32).collect()
}

/// Why a program stopped early.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Trip {
    #[error("stop requested")]
    Stop,
    #[error("flight time limit {0:.0}s reached")]
    FlightTime(f32),
    #[error("battery {0}% below hard floor")]
    Battery(u8),
    #[error("attitude out of bounds (roll {roll:.1}°, pitch {pitch:.1}°)")]
    Attitude { roll: f32, pitch: f32 },
    #[error("fc link failure: {0}")]
    Link(String),
    /// Autonomous mode was dropped under us (FC alert or operator disarm).
    #[error("control revoked")]
    ControlRevoked,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    pub state: ExecState,
    /// Commands carried out to the end.
    pub executed: usize,
    pub reason: Option<String>,
}

enum Step {
    Next,
    /// Emergency command: program ends here, already disarmed.
    Halt,
}

/// Handle to a program running on its own task.
pub struct RunHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<ExecOutcome>,
}

impl RunHandle {
    /// Request an emergency landing. Observed by the engine within one tick.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> ExecOutcome {
        match self.join.await {
            Ok(out) => out,
            Err(e) => ExecOutcome { state: ExecState::Aborted, executed: 0, reason: Some(format!("executor task failed: {}", e)) },
        }
    }
}

/// Walks a validated program against the FC link.
pub struct Engine {
    link: Arc<FcLink>,
    policy: SafetyPolicy,
    timing: ExecTiming,
    status: watch::Sender<ExecState>,
}

impl Engine {
    pub fn new(link: Arc<FcLink>, policy: SafetyPolicy, timing: ExecTiming) -> Self {
        let (status, _) = watch::channel(ExecState::Idle);
        Self { link, policy, timing, status }
    }

    pub fn state(&self) -> ExecState {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecState> {
        self.status.subscribe()
    }

    fn set(&self, s: ExecState) {
        if self.status.send_replace(s) != s {
            info!("exec: -> {:?}", s);
        }
    }

    /// Take exclusive control of the link and run `program` on a new task.
    /// Returns `None` if another program already holds autonomous mode.
    pub fn start(self: &Arc<Self>, program: Program) -> Option<RunHandle> {
        if !self.link.state().enter_autonomous() {
            warn!("exec: start refused, autonomous mode already active");
            return None;
        }
        self.set(ExecState::Running);

        let (stop_tx, stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let join = tokio::spawn(async move { this.execute(program, stop_rx).await });
        Some(RunHandle { stop: stop_tx, join })
    }

    async fn execute(&self, program: Program, mut stop: watch::Receiver<bool>) -> ExecOutcome {
        let started = Instant::now();
        let total = program.len();
        let mut executed = 0;
        let mut halted = false;
        let mut trip = None;

        info!("exec: starting program ({} commands, est {:.1}s)", total, program.estimated_flight_time());

        for (i, cmd) in program.into_iter().enumerate() {
            if let Err(t) = self.guards(started, &stop, false) {
                trip = Some(t);
                break;
            }
            info!("exec: [{}/{}] {}", i + 1, total, cmd.name());
            match self.dispatch(&cmd, started, &mut stop).await {
                Ok(Step::Next) => executed += 1,
                Ok(Step::Halt) => {
                    executed += 1;
                    halted = true;
                    break;
                }
                Err(t) => {
                    trip = Some(t);
                    break;
                }
            }
        }

        let state = match &trip {
            None if !halted => ExecState::Completed,
            None => ExecState::Aborted,
            Some(Trip::ControlRevoked) => {
                warn!("exec: control revoked, abandoning program without landing");
                ExecState::Aborted
            }
            Some(t) => {
                warn!("exec: aborting program: {}", t);
                self.emergency_land().await;
                ExecState::Aborted
            }
        };

        self.link.state().leave_autonomous();
        self.set(state);
        info!("exec: finished {:?} after {}/{} commands", state, executed, total);
        ExecOutcome { state, executed, reason: trip.map(|t| t.to_string()) }
    }

    /// Runtime abort conditions, read from one consistent flight state view.
    fn guards(&self, started: Instant, stop: &watch::Receiver<bool>, in_move: bool) -> Result<(), Trip> {
        if *stop.borrow() {
            return Err(Trip::Stop);
        }
        let st = self.link.state().get();
        if !st.autonomous_mode {
            return Err(Trip::ControlRevoked);
        }
        if started.elapsed().as_secs_f32() > self.policy.max_flight_time {
            return Err(Trip::FlightTime(self.policy.max_flight_time));
        }
        if st.telemetry.battery_percent < BATTERY_FLOOR {
            return Err(Trip::Battery(st.telemetry.battery_percent));
        }
        let t = &st.telemetry;
        if in_move && (t.roll.abs() > MAX_LIVE_TILT || t.pitch.abs() > MAX_LIVE_TILT) {
            return Err(Trip::Attitude { roll: t.roll, pitch: t.pitch });
        }
        Ok(())
    }

    /// Sleep for `d`, waking early on a stop request.
    async fn pause(&self, d: Duration, stop: &mut watch::Receiver<bool>) -> Result<(), Trip> {
        if *stop.borrow() {
            return Err(Trip::Stop);
        }
        tokio::select! {
            _ = tokio::time::sleep(d) => {}
            _ = stop_requested(stop) => return Err(Trip::Stop),
        }
        if !self.link.state().is_autonomous() {
            return Err(Trip::ControlRevoked);
        }
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), Trip> {
        match self.link.send_autonomous(&frame).await {
            Ok(()) => Ok(()),
            Err(LinkError::NotAutonomous) => Err(Trip::ControlRevoked),
            Err(e) => Err(Trip::Link(e.to_string())),
        }
    }

    async fn throttle_ramp(&self, schedule: (f32, f32, f32), pace: Duration, stop: &mut watch::Receiver<bool>) -> Result<(), Trip> {
        for thr in ramp(schedule) {
            self.send(Frame::Cmd(Setpoint::level(thr))).await?;
            self.pause(pace, stop).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, cmd: &Command, started: Instant, stop: &mut watch::Receiver<bool>) -> Result<Step, Trip> {
        let state = self.link.state();
        match cmd {
            Command::Takeoff { delay } => {
                self.set(ExecState::TakeoffSeq);
                if !state.is_armed() {
                    self.send(Frame::Arm).await?;
                    self.pause(self.timing.arm_settle, stop).await?;
                    state.set_armed(true);
                }
                self.throttle_ramp(TAKEOFF_RAMP, self.timing.takeoff_pace, stop).await?;
                self.set(ExecState::Running);
                self.pause(secs(*delay), stop).await?;
            }
            Command::Land { delay } => {
                self.throttle_ramp(LAND_RAMP, self.timing.land_pace, stop).await?;
                self.send(Frame::Disarm).await?;
                state.set_armed(false);
                self.pause(secs(*delay), stop).await?;
            }
            Command::Hover { delay } => {
                self.send(Frame::Cmd(Setpoint::level(CRUISE_THROTTLE))).await?;
                self.pause(secs(*delay), stop).await?;
            }
            Command::Move { roll, pitch, throttle, yaw, duration } => {
                let hz = 1.0 / self.timing.tick.as_secs_f32();
                let ticks = ((duration * hz).round() as u32).max(1);
                let sp = Setpoint { roll: *roll, pitch: *pitch, throttle: *throttle, yaw: *yaw };
                for _ in 0..ticks {
                    self.guards(started, stop, true)?;
                    self.send(Frame::Cmd(sp)).await?;
                    self.pause(self.timing.tick, stop).await?;
                }
                self.send(Frame::Cmd(Setpoint::level(*throttle))).await?;
            }
            Command::Wait { duration } => {
                self.pause(secs(*duration), stop).await?;
            }
            Command::Emergency => {
                if let Err(e) = self.link.send(&Frame::Disarm).await {
                    warn!("exec: emergency DISARM failed: {}", e);
                }
                state.set_armed(false);
                return Ok(Step::Halt);
            }
            Command::Led { payload, delay } => {
                info!("exec: led {}", payload);
                self.pause(secs(*delay), stop).await?;
            }
        }
        Ok(Step::Next)
    }

    /// Coarse descent and disarm. Best effort: write failures are logged and
    /// the sequence carries on, nothing is retried.
    async fn emergency_land(&self) {
        self.set(ExecState::EmergencyLanding);
        for thr in ramp(EMERGENCY_RAMP) {
            match self.link.send_autonomous(&Frame::Cmd(Setpoint::level(thr))).await {
                Ok(()) => {}
                Err(LinkError::NotAutonomous) => {
                    warn!("exec: control revoked during emergency descent");
                    break;
                }
                Err(e) => warn!("exec: emergency descent write failed: {}", e),
            }
            tokio::time::sleep(self.timing.emergency_pace).await;
        }
        if let Err(e) = self.link.send(&Frame::Disarm).await {
            warn!("exec: emergency DISARM failed: {}", e);
        }
        self.link.state().set_armed(false);
    }
}

fn secs(s: f32) -> Duration {
    Duration::from_secs_f32(s.max(0.0))
}

/// Resolves once stop is requested. Never resolves if the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let requested = stop.wait_for(|s| *s).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
