use filo_proto::wire::Frame;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::link::{FcLink, LinkError};
use crate::state::ArmResult;

pub const DEFAULT_ARM_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmOutcome {
    Armed,
    /// FC answered with an explicit pre-arm failure.
    Refused,
    /// No answer within the timeout.
    TimedOut,
}

/// Operator arm handshake: clear the result slot, send `ARM`, and wait for
/// the decoder to post a resolution.
///
/// The wait is on a watch channel, never on the flight state lock, so the
/// decoder is free to write the answer.
pub async fn arm_handshake(link: &FcLink, timeout: Duration) -> Result<ArmOutcome, LinkError> {
    let state = link.state();
    state.clear_arm_result();
    let mut rx = state.subscribe_arm();

    link.send_operator(&Frame::Arm).await?;
    info!("arm: request sent, waiting up to {:?}", timeout);

    let outcome = match tokio::time::timeout(timeout, rx.wait_for(|r| *r != ArmResult::None)).await {
        Ok(Ok(r)) if *r == ArmResult::Success => ArmOutcome::Armed,
        Ok(Ok(_)) => ArmOutcome::Refused,
        // sender lives as long as the state handle, so a closed channel means no answer
        Ok(Err(_)) | Err(_) => ArmOutcome::TimedOut,
    };

    match outcome {
        ArmOutcome::Armed => {
            state.set_armed(true);
            info!("arm: FC armed");
        }
        ArmOutcome::Refused => warn!("arm: FC refused (pre-arm check failed)"),
        ArmOutcome::TimedOut => warn!("arm: no response from FC within {:?}", timeout),
    }
    Ok(outcome)
}
