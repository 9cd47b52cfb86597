use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    Warning,
    Error,
}

/// Latest known FC telemetry. Updated field by field as lines arrive, so a
/// value that a given line does not carry keeps its previous reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub roll: f32,            // degrees
    pub pitch: f32,           // degrees
    pub yaw_rate: f32,        // degrees/s
    pub battery_voltage: f32, // Volts
    pub battery_percent: u8,  // 0-100
    pub armed: bool,
    pub connection: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_serializes_lowercase() {
        let s = serde_json::to_string(&ConnectionStatus::Warning).unwrap();
        assert_eq!(s, "\"warning\"");
    }

    #[test]
    fn default_sample_is_disconnected() {
        let t = TelemetrySample::default();
        assert_eq!(t.connection, ConnectionStatus::Disconnected);
        assert_eq!(t.battery_percent, 0);
    }
}
