//! Macro program tokenizer.
//!
//! A program is plain text, one or more `;`-separated statements per line:
//!
//! ```text
//! import filo
//! # climb and look around
//! filo.takeoff()
//! filo.move_forward(100); filo.rotate_clockwise(90)
//! time.sleep(2)
//! filo.led_flash(255, 0, 0, 5)
//! filo.land()
//! ```
//!
//! Each statement is `[receiver.]name(args)`. The receiver is ignored.
//! Statements that are not recognized are skipped, never reported as errors.

use std::str::{Lines, Split};
use tracing::debug;

use crate::command::*;
use crate::policy::SafetyPolicy;

/// Lazy command stream over program text. Consumed once.
pub struct Parser<'a> {
    lines: Lines<'a>,
    stmts: Option<Split<'a, char>>,
    policy: &'a SafetyPolicy,
}

pub fn parse<'a>(src: &'a str, policy: &'a SafetyPolicy) -> Parser<'a> {
    Parser { lines: src.lines(), stmts: None, policy }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        loop {
            if let Some(stmt) = self.stmts.as_mut().and_then(|s| s.next()) {
                let stmt = stmt.trim();
                if stmt.is_empty() {
                    continue;
                }
                match parse_statement(stmt, self.policy) {
                    Some(cmd) => return Some(cmd),
                    None => {
                        debug!("parser: skipping unrecognized statement: {}", stmt);
                        continue;
                    }
                }
            }

            let line = self.lines.next()?;
            let line = strip_comment(line).trim();
            self.stmts = if is_skippable(line) { None } else { Some(line.split(';')) };
        }
    }
}

/// Cut a trailing `#` or `//` comment. Markers inside string literals
/// (`led_color("#ff0000")`) are left alone.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut chars = line.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => return &line[..i],
            (None, '/') if matches!(chars.peek(), Some((_, '/'))) => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_skippable(line: &str) -> bool {
    line.is_empty()
        || line.starts_with("import ")
        || (line.starts_with("from ") && line.contains(" import "))
}

/// Split `recv.name(args)` into `(name, args)`.
fn split_call(stmt: &str) -> Option<(&str, &str)> {
    let open = stmt.find('(')?;
    let inner = stmt.strip_suffix(')')?.get(open + 1..)?;
    let path = stmt[..open].trim();
    let name = path.rsplit('.').next()?;
    let ident = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !path.split('.').all(ident) {
        return None;
    }
    Some((name, inner.trim()))
}

fn single_number(args: &str) -> Option<f32> {
    let v: f32 = args.parse().ok()?;
    (v.is_finite() && v >= 0.0).then_some(v)
}

fn horizontal(policy: &SafetyPolicy, distance: f32, roll: f32, pitch: f32, throttle: f32) -> Command {
    Command::Move {
        roll,
        pitch,
        throttle,
        yaw: 0.0,
        duration: distance.min(policy.max_distance) / policy.max_speed,
    }
}

fn rotate(policy: &SafetyPolicy, angle: f32, yaw: f32) -> Command {
    Command::Move {
        roll: 0.0,
        pitch: 0.0,
        throttle: CRUISE_THROTTLE,
        yaw,
        duration: angle.min(policy.max_rotation) / NOMINAL_TURN_RATE,
    }
}

pub fn parse_statement(stmt: &str, policy: &SafetyPolicy) -> Option<Command> {
    let (name, args) = split_call(stmt)?;

    if name.starts_with("led") {
        return Some(Command::Led { payload: stmt.to_string(), delay: LED_DELAY });
    }

    let cmd = match (name, args.is_empty()) {
        ("takeoff", true) => Command::Takeoff { delay: TAKEOFF_DELAY },
        ("land", true) => Command::Land { delay: LAND_DELAY },
        ("stop" | "hover", true) => Command::Hover { delay: HOVER_DELAY },
        ("emergency", true) => Command::Emergency,
        (_, true) => return None,
        (name, false) => {
            let n = single_number(args)?;
            match name {
                "move_forward" => horizontal(policy, n, 0.0, MOVE_TILT, CRUISE_THROTTLE),
                "move_back" | "move_backward" => horizontal(policy, n, 0.0, -MOVE_TILT, CRUISE_THROTTLE),
                "move_right" => horizontal(policy, n, MOVE_TILT, 0.0, CRUISE_THROTTLE),
                "move_left" => horizontal(policy, n, -MOVE_TILT, 0.0, CRUISE_THROTTLE),
                "move_up" => horizontal(policy, n, 0.0, 0.0, CLIMB_THROTTLE),
                "move_down" => horizontal(policy, n, 0.0, 0.0, DESCEND_THROTTLE),
                "rotate_clockwise" => rotate(policy, n, ROTATE_YAW),
                "rotate_counter_clockwise" => rotate(policy, n, -ROTATE_YAW),
                "sleep" | "wait" => Command::Wait { duration: n.min(MAX_WAIT) },
                _ => return None,
            }
        }
    };
    Some(cmd)
}
