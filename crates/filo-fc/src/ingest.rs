use filo_proto::telemetry::ConnectionStatus;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

use crate::decode::TelemetryDecoder;

/// Serial ingestion loop. Feeds every chunk read from `reader` into the
/// decoder. Read errors degrade the connection and are retried after
/// `backoff`; the loop only returns when the stream ends.
pub async fn run_ingest<R>(mut reader: R, mut decoder: TelemetryDecoder, backoff: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 512];
    let mut failures: u32 = 0;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                info!("fc rx: stream closed");
                decoder.state().set_connection(ConnectionStatus::Disconnected);
                return;
            }
            Ok(n) => {
                if failures > 0 {
                    info!("fc rx: recovered after {} failures", failures);
                    failures = 0;
                }
                decoder.feed(&chunk[..n]);
            }
            Err(e) => {
                failures += 1;
                warn!("fc rx: read error (failures: {}): {}", failures, e);
                decoder.state().set_connection(ConnectionStatus::Error);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
