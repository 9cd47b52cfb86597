use filo_proto::telemetry::ConnectionStatus;
use filo_proto::wire::Frame;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use crate::state::FlightStateHandle;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("autonomous program in control; operator write rejected")]
    AutonomousMode,
    #[error("autonomous mode revoked; program write dropped")]
    NotAutonomous,
    #[error("fc serial write failed: {0}")]
    Io(#[from] std::io::Error),
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outbound half of the FC serial link.
///
/// The writer sits behind an async mutex so that only one frame is on the
/// wire at a time. Operator writes go through [`FcLink::send_operator`],
/// which refuses while a program owns the link.
pub struct FcLink {
    writer: Mutex<BoxWriter>,
    state: FlightStateHandle,
}

impl FcLink {
    pub fn new<W>(writer: W, state: FlightStateHandle) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { writer: Mutex::new(Box::new(writer)), state }
    }

    /// Open the FC serial device. Returns the link and the inbound half for
    /// the ingestion loop.
    pub fn open_serial(
        dev: &str,
        baud: u32,
        state: FlightStateHandle,
    ) -> anyhow::Result<(Self, ReadHalf<SerialStream>)> {
        use anyhow::Context;

        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open fc serial device {}", dev))?;
        let (rx, tx) = tokio::io::split(port);
        Ok((Self::new(tx, state), rx))
    }

    pub fn state(&self) -> &FlightStateHandle {
        &self.state
    }

    /// Write a frame unconditionally. Used by the execution engine, which
    /// owns the link while autonomous mode is set.
    pub async fn send(&self, frame: &Frame) -> Result<(), LinkError> {
        let mut w = self.writer.lock().await;
        self.write_locked(&mut w, frame).await
    }

    /// Write a frame on behalf of a running program. Refused once autonomous
    /// mode has been dropped, checked under the writer lock, so nothing a
    /// program queues can follow an operator `DISARM` onto the wire.
    pub async fn send_autonomous(&self, frame: &Frame) -> Result<(), LinkError> {
        let mut w = self.writer.lock().await;
        if !self.state.is_autonomous() {
            return Err(LinkError::NotAutonomous);
        }
        self.write_locked(&mut w, frame).await
    }

    /// Write a frame on behalf of the operator. The autonomous flag is read
    /// after the writer lock is taken, so an operator frame can never land in
    /// the middle of a program.
    pub async fn send_operator(&self, frame: &Frame) -> Result<(), LinkError> {
        let mut w = self.writer.lock().await;
        if self.state.is_autonomous() {
            return Err(LinkError::AutonomousMode);
        }
        self.write_locked(&mut w, frame).await
    }

    async fn write_locked(&self, w: &mut BoxWriter, frame: &Frame) -> Result<(), LinkError> {
        let line = frame.encode();
        let res = async {
            w.write_all(line.as_bytes()).await?;
            w.flush().await
        }
        .await;

        match res {
            Ok(()) => {
                debug!("fc tx: {}", line.trim_end());
                Ok(())
            }
            Err(e) => {
                warn!("fc tx failed ({}): {}", line.trim_end(), e);
                self.state.set_connection(ConnectionStatus::Error);
                Err(LinkError::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filo_proto::wire::Setpoint;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn operator_writes_rejected_in_autonomous_mode() {
        let (tx, rx) = tokio::io::duplex(1024);
        let state = FlightStateHandle::new();
        let link = FcLink::new(tx, state.clone());

        link.send_operator(&Frame::Status).await.unwrap();
        state.enter_autonomous();
        let err = link.send_operator(&Frame::Cmd(Setpoint::level(1200.0))).await.unwrap_err();
        assert!(matches!(err, LinkError::AutonomousMode));
        link.send(&Frame::Disarm).await.unwrap();

        drop(link);
        let mut lines = BufReader::new(rx).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("STATUS"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("DISARM"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn program_writes_stop_once_control_is_revoked() {
        let (tx, rx) = tokio::io::duplex(1024);
        let state = FlightStateHandle::new();
        let link = FcLink::new(tx, state.clone());

        let err = link.send_autonomous(&Frame::Cmd(Setpoint::level(1400.0))).await.unwrap_err();
        assert!(matches!(err, LinkError::NotAutonomous));

        state.enter_autonomous();
        link.send_autonomous(&Frame::Cmd(Setpoint::level(1400.0))).await.unwrap();
        state.force_disarm();
        link.send(&Frame::Disarm).await.unwrap();
        let err = link.send_autonomous(&Frame::Cmd(Setpoint::level(1400.0))).await.unwrap_err();
        assert!(matches!(err, LinkError::NotAutonomous));

        drop(link);
        let mut lines = BufReader::new(rx).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("CMD,0.00,0.00,1400,0.00"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("DISARM"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_failure_marks_connection_error() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(rx);
        let state = FlightStateHandle::new();
        let link = FcLink::new(tx, state.clone());

        let err = link.send(&Frame::Arm).await.unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
        assert_eq!(state.telemetry().connection, ConnectionStatus::Error);
    }
}
