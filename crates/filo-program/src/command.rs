use serde::Serialize;

/// Settle time after the takeoff ramp, seconds.
pub const TAKEOFF_DELAY: f32 = 3.0;
pub const LAND_DELAY: f32 = 3.0;
pub const HOVER_DELAY: f32 = 1.0;
pub const LED_DELAY: f32 = 0.5;

/// Throttle (µs) that holds altitude.
pub const CRUISE_THROTTLE: f32 = 1400.0;
pub const CLIMB_THROTTLE: f32 = 1550.0;
pub const DESCEND_THROTTLE: f32 = 1250.0;
/// Attitude bias for horizontal moves, degrees.
pub const MOVE_TILT: f32 = 15.0;
/// Yaw rate for rotate commands, degrees/s.
pub const ROTATE_YAW: f32 = 30.0;
/// Nominal angular rate used to size rotate commands, degrees/s.
pub const NOMINAL_TURN_RATE: f32 = 90.0;
/// Hard ceiling for sleep/wait, seconds. Not part of the safety policy.
pub const MAX_WAIT: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Takeoff { delay: f32 },
    Land { delay: f32 },
    Hover { delay: f32 },
    Emergency,
    Move { roll: f32, pitch: f32, throttle: f32, yaw: f32, duration: f32 },
    Wait { duration: f32 },
    Led { payload: String, delay: f32 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Takeoff { .. } => "takeoff",
            Command::Land { .. } => "land",
            Command::Hover { .. } => "hover",
            Command::Emergency => "emergency",
            Command::Move { .. } => "move",
            Command::Wait { .. } => "wait",
            Command::Led { .. } => "led",
        }
    }

    /// Active time of the command in seconds (moves and waits).
    pub fn duration(&self) -> f32 {
        match self {
            Command::Move { duration, .. } | Command::Wait { duration } => *duration,
            _ => 0.0,
        }
    }

    /// Hold time after the command has been carried out, seconds.
    pub fn delay(&self) -> f32 {
        match self {
            Command::Takeoff { delay }
            | Command::Land { delay }
            | Command::Hover { delay }
            | Command::Led { delay, .. } => *delay,
            _ => 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Command::Land { .. } | Command::Emergency)
    }
}

/// Ordered commands from one program submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Program {
    commands: Vec<Command>,
}

impl Program {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Sum of durations and hold delays, seconds.
    pub fn estimated_flight_time(&self) -> f32 {
        self.commands.iter().map(|c| c.duration() + c.delay()).sum()
    }
}

impl FromIterator<Command> for Program {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self { commands: iter.into_iter().collect() }
    }
}

impl IntoIterator for Program {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
