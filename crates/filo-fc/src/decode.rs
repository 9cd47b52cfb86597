use bytes::{Buf, BytesMut};
use filo_proto::telemetry::{ConnectionStatus, TelemetrySample};
use filo_proto::wire::{
    ACK_PREFIX, ALERT_PREFIXES, ARMED, ARM_FAIL_PREFIX, ARM_OK, PREARM_PREFIX, STATUS_PREFIX,
    TELEM_PREFIX,
};
use tracing::{debug, info, warn};

use crate::state::{ArmResult, FlightStateHandle};

/// Longest line we are willing to reassemble. Anything past this without a
/// terminator is line noise and gets dropped.
pub const MAX_LINE: usize = 4096;

/// Partial telemetry carried by one inbound line. `None` fields were missing
/// or failed validation and must leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub roll: Option<f32>,
    pub pitch: Option<f32>,
    pub yaw_rate: Option<f32>,
    pub battery_voltage: Option<f32>,
    pub battery_percent: Option<u8>,
    pub armed: Option<bool>,
}

impl TelemetryUpdate {
    pub fn apply(&self, t: &mut TelemetrySample) {
        if let Some(v) = self.roll { t.roll = v; }
        if let Some(v) = self.pitch { t.pitch = v; }
        if let Some(v) = self.yaw_rate { t.yaw_rate = v; }
        if let Some(v) = self.battery_voltage { t.battery_voltage = v; }
        if let Some(v) = self.battery_percent { t.battery_percent = v; }
        if let Some(v) = self.armed { t.armed = v; }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Telemetry(TelemetryUpdate),
    Status(TelemetryUpdate),
    Ack,
    ArmOk,
    ArmFail(String),
    Alert(String),
    Diagnostic(String),
}

pub fn classify(line: &str) -> Inbound {
    if let Some(rest) = line.strip_prefix(TELEM_PREFIX) {
        // roll,pitch,yaw_rate,throttle,voltage,battery%,armed,FL,FR,RL,RR
        let f: Vec<&str> = rest.split(',').collect();
        return Inbound::Telemetry(TelemetryUpdate {
            roll: num_field(f.first()),
            pitch: num_field(f.get(1)),
            yaw_rate: num_field(f.get(2)),
            battery_voltage: num_field(f.get(4)),
            battery_percent: percent_field(f.get(5)),
            armed: match f.get(6).map(|s| s.trim()) {
                Some("1") => Some(true),
                Some("0") => Some(false),
                _ => None,
            },
        });
    }
    if let Some(rest) = line.strip_prefix(STATUS_PREFIX) {
        // ARMED|DISARMED,voltage,roll,pitch
        let f: Vec<&str> = rest.split(',').collect();
        return Inbound::Status(TelemetryUpdate {
            armed: match f.first().map(|s| s.trim()) {
                Some("ARMED") => Some(true),
                Some("DISARMED") => Some(false),
                _ => None,
            },
            battery_voltage: num_field(f.get(1)),
            roll: num_field(f.get(2)),
            pitch: num_field(f.get(3)),
            ..Default::default()
        });
    }
    if line.starts_with(ACK_PREFIX) {
        return Inbound::Ack;
    }
    if line.starts_with(ARM_FAIL_PREFIX) || line.starts_with(PREARM_PREFIX) {
        return Inbound::ArmFail(line.to_string());
    }
    if line.starts_with(ARM_OK) || line == ARMED {
        return Inbound::ArmOk;
    }
    if ALERT_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return Inbound::Alert(line.to_string());
    }
    Inbound::Diagnostic(line.to_string())
}

fn num_field(raw: Option<&&str>) -> Option<f32> {
    let s = raw?.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-')) {
        return None;
    }
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn percent_field(raw: Option<&&str>) -> Option<u8> {
    let v = num_field(raw)?;
    (0.0..=100.0).contains(&v).then_some(v as u8)
}

#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub lines: u64,
    pub telemetry: u64,
    pub dropped_bytes: u64,
}

/// Incremental decoder for the FC's inbound line stream.
///
/// Reads may split or coalesce lines arbitrarily; partial lines are kept
/// until their terminator arrives.
pub struct TelemetryDecoder {
    buf: BytesMut,
    state: FlightStateHandle,
    stats: DecoderStats,
}

impl TelemetryDecoder {
    pub fn new(state: FlightStateHandle) -> Self {
        Self { buf: BytesMut::with_capacity(256), state, stats: DecoderStats::default() }
    }

    pub fn state(&self) -> &FlightStateHandle {
        &self.state
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// Append `data` and consume every complete line. Returns the number of
    /// lines handled.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        self.buf.extend_from_slice(data);
        let mut handled = 0;

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim();
            if !line.is_empty() {
                self.handle_line(line);
                handled += 1;
            }
        }

        if self.buf.len() > MAX_LINE {
            warn!("fc rx: {} bytes without terminator, resync", self.buf.len());
            self.stats.dropped_bytes += self.buf.len() as u64;
            self.buf.advance(self.buf.len());
        }
        handled
    }

    fn handle_line(&mut self, line: &str) {
        self.stats.lines += 1;
        match classify(line) {
            Inbound::Telemetry(upd) => {
                self.stats.telemetry += 1;
                self.state.update(|st| {
                    upd.apply(&mut st.telemetry);
                    st.telemetry.connection = ConnectionStatus::Connected;
                });
            }
            Inbound::Status(upd) => {
                self.state.update(|st| upd.apply(&mut st.telemetry));
            }
            Inbound::Ack => {
                debug!("fc ack: {}", line);
                self.state.set_connection(ConnectionStatus::Connected);
            }
            Inbound::ArmOk => {
                info!("fc: arm accepted");
                self.state.resolve_arm(ArmResult::Success);
            }
            Inbound::ArmFail(msg) => {
                warn!("fc: arm refused: {}", msg);
                self.state.resolve_arm(ArmResult::Failure);
            }
            Inbound::Alert(msg) => {
                warn!("fc ALERT: {}", msg);
                self.state.force_disarm();
            }
            Inbound::Diagnostic(msg) => {
                debug!("fc: {}", msg);
            }
        }
    }
}
