//! Operator-facing request/response contract.
//!
//! Whatever carries operator requests (web routes, a JSON line console) calls
//! into [`Operator`]; every call yields a serializable [`Response`].

use filo_fc::arm::{arm_handshake, ArmOutcome};
use filo_fc::link::{FcLink, LinkError};
use filo_fc::state::{FlightSnapshot, FlightStateHandle};
use filo_program::{parse, validate, Program, SafetyPolicy};
use filo_proto::telemetry::TelemetrySample;
use filo_proto::wire::{Frame, Setpoint, THROTTLE_MIN};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::{Engine, ExecOutcome, ExecState, RunHandle};

/// Stick deflection to attitude, degrees at full deflection.
pub const STICK_DEGREES: f32 = 45.0;
/// Throttle stick rest position. Arming needs the cached stick at or below
/// `ARM_STICK_MAX`.
pub const STICK_MIN: f32 = -1.0;
pub const ARM_STICK_MAX: f32 = -0.9;

#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("autonomous program in control")]
    Autonomous,
    #[error("motors are disarmed")]
    Disarmed,
    #[error("throttle must be at minimum before arming")]
    ThrottleNotAtMinimum,
    #[error("a program is already running")]
    ProgramRunning,
    #[error("no program is running")]
    NoProgram,
    #[error("no recognized commands in program")]
    EmptyProgram,
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<Setpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arm: Option<ArmOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight: Option<FlightSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<ExecState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<SafetyPolicy>,
}

impl Response {
    fn new(status: Status) -> Self {
        Self {
            status,
            message: None,
            commands: None,
            errors: None,
            warnings: None,
            sent: None,
            arm: None,
            telemetry: None,
            flight: None,
            program: None,
            policy: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Self::new(Status::Ok) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Self::new(Status::Error) }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

impl From<Rejection> for Response {
    fn from(r: Rejection) -> Self {
        Response::error(r.to_string())
    }
}

/// Stick input in [-1, 1]. Omitted axes keep their last value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StickInput {
    pub roll: Option<f32>,
    pub pitch: Option<f32>,
    pub yaw: Option<f32>,
    pub throttle: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
struct Sticks {
    roll: f32,
    pitch: f32,
    yaw: f32,
    throttle: f32,
}

impl Default for Sticks {
    fn default() -> Self {
        Self { roll: 0.0, pitch: 0.0, yaw: 0.0, throttle: STICK_MIN }
    }
}

impl Sticks {
    fn merge(&mut self, input: &StickInput) {
        let axis = |v: Option<f32>, cur: f32| v.filter(|x| x.is_finite()).map(|x| x.clamp(-1.0, 1.0)).unwrap_or(cur);
        self.roll = axis(input.roll, self.roll);
        self.pitch = axis(input.pitch, self.pitch);
        self.yaw = axis(input.yaw, self.yaw);
        self.throttle = axis(input.throttle, self.throttle);
    }

    /// `throttle = 1000 + (1 - t) * 500`, so the stick's rest position sends
    /// the top of the pulse range.
    fn setpoint(&self) -> Setpoint {
        Setpoint {
            roll: self.roll * STICK_DEGREES,
            pitch: self.pitch * STICK_DEGREES,
            throttle: THROTTLE_MIN + ((-self.throttle + 1.0) * 500.0),
            yaw: self.yaw * STICK_DEGREES,
        }
    }
}

/// One operator request, as carried over a JSON transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Run { code: String },
    Joystick(StickInput),
    Arm,
    Disarm,
    Telemetry,
    Status,
    Stop,
}

pub struct Operator {
    link: Arc<FcLink>,
    engine: Arc<Engine>,
    policy: SafetyPolicy,
    arm_timeout: Duration,
    sticks: Mutex<Sticks>,
    run: Mutex<Option<RunHandle>>,
}

impl Operator {
    pub fn new(link: Arc<FcLink>, engine: Arc<Engine>, policy: SafetyPolicy, arm_timeout: Duration) -> Self {
        Self {
            link,
            engine,
            policy,
            arm_timeout,
            sticks: Mutex::new(Sticks::default()),
            run: Mutex::new(None),
        }
    }

    fn state(&self) -> &FlightStateHandle {
        self.link.state()
    }

    fn sticks(&self) -> std::sync::MutexGuard<'_, Sticks> {
        self.sticks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_slot(&self) -> std::sync::MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn handle(&self, req: Request) -> Response {
        match req {
            Request::Run { code } => self.submit_program(&code),
            Request::Joystick(input) => self.joystick(input).await,
            Request::Arm => self.arm().await,
            Request::Disarm => self.disarm().await,
            Request::Telemetry => self.telemetry(),
            Request::Status => self.status().await,
            Request::Stop => self.stop(),
        }
    }

    /// Parse, validate and start a macro program.
    pub fn submit_program(&self, code: &str) -> Response {
        let program: Program = parse(code, &self.policy).collect();
        if program.is_empty() {
            return Rejection::EmptyProgram.into();
        }

        let report = validate(&program, &self.state().telemetry(), &self.policy);
        if !report.valid {
            warn!("operator: program rejected ({} errors)", report.errors.len());
            return Response {
                errors: Some(report.errors),
                warnings: Some(report.warnings),
                ..Response::new(Status::Error)
            };
        }

        let mut slot = self.run_slot();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Rejection::ProgramRunning.into();
        }
        let n = program.len();
        match self.engine.start(program) {
            Some(handle) => {
                *slot = Some(handle);
                info!("operator: program started ({} commands, {} warnings)", n, report.warnings.len());
                Response {
                    commands: Some(n),
                    warnings: Some(report.warnings),
                    message: Some(format!("program started with {} commands", n)),
                    ..Response::new(Status::Success)
                }
            }
            None => Rejection::Autonomous.into(),
        }
    }

    pub async fn joystick(&self, input: StickInput) -> Response {
        match self.try_joystick(input).await {
            Ok(sent) => Response {
                sent: Some(sent),
                telemetry: Some(self.state().telemetry()),
                ..Response::new(Status::Ok)
            },
            Err(r) => r.into(),
        }
    }

    async fn try_joystick(&self, input: StickInput) -> Result<Setpoint, Rejection> {
        let st = self.state().get();
        if st.autonomous_mode {
            return Err(Rejection::Autonomous);
        }
        if !st.armed {
            return Err(Rejection::Disarmed);
        }
        self.state().touch_operator();

        let sp = {
            let mut sticks = self.sticks();
            sticks.merge(&input);
            sticks.setpoint()
        };
        self.link.send_operator(&Frame::Cmd(sp)).await?;
        Ok(sp)
    }

    pub async fn arm(&self) -> Response {
        if self.state().is_autonomous() {
            return Rejection::Autonomous.into();
        }
        if self.sticks().throttle > ARM_STICK_MAX {
            return Rejection::ThrottleNotAtMinimum.into();
        }

        match arm_handshake(&self.link, self.arm_timeout).await {
            Ok(outcome) => {
                let mut resp = match outcome {
                    ArmOutcome::Armed => {
                        self.state().touch_operator();
                        Response::ok("motors armed")
                    }
                    ArmOutcome::Refused => Response::error("arm refused by flight controller (pre-arm check failed)"),
                    ArmOutcome::TimedOut => Response::error("no arm response from flight controller"),
                };
                resp.arm = Some(outcome);
                resp
            }
            Err(e) => Rejection::from(e).into(),
        }
    }

    /// Always succeeds. A running program sees autonomous mode drop and
    /// abandons without landing.
    pub async fn disarm(&self) -> Response {
        self.state().force_disarm();
        self.sticks().throttle = STICK_MIN;
        if let Err(e) = self.link.send(&Frame::Disarm).await {
            warn!("operator: DISARM write failed: {}", e);
        }
        info!("operator: motors disarmed");
        Response::ok("motors disarmed")
    }

    pub fn telemetry(&self) -> Response {
        Response { telemetry: Some(self.state().telemetry()), ..Response::new(Status::Ok) }
    }

    pub async fn status(&self) -> Response {
        match self.link.send_operator(&Frame::Status).await {
            Ok(()) | Err(LinkError::AutonomousMode) => {}
            Err(e) => warn!("operator: STATUS request failed: {}", e),
        }
        Response {
            flight: Some(self.state().snapshot()),
            program: Some(self.engine.state()),
            policy: Some(self.policy.clone()),
            ..Response::new(Status::Ok)
        }
    }

    pub fn stop(&self) -> Response {
        match self.run_slot().as_ref() {
            Some(h) if !h.is_finished() => {
                h.stop();
                warn!("operator: stop requested, emergency landing");
                Response::ok("stop requested, emergency landing")
            }
            _ => Rejection::NoProgram.into(),
        }
    }

    /// Wait for the current program, if any, to finish.
    pub async fn wait_program(&self) -> Option<ExecOutcome> {
        let handle = self.run_slot().take()?;
        Some(handle.wait().await)
    }
}
