use std::time::Duration;

use thiserror::Error;

/// Failures of the realtime sync channel.
///
/// Only `Connect`, `Timeout`, `Aborted` and `ChannelClosed` ever reach a
/// caller (through `SyncChannel::connect`). `Parse` and `SendRejected` are
/// logged inside the channel and absorbed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to open sync connection: {0}")]
    Connect(String),

    #[error("sync connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("sync channel was disconnected while the handshake was in flight")]
    Aborted,

    #[error("malformed sync message: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("sync channel is not connected")]
    SendRejected,

    #[error("sync channel has shut down")]
    ChannelClosed,
}

pub type SyncResult<T> = Result<T, SyncError>;
