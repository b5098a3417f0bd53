//! Error taxonomy of the session layer.
//!
//! Only [`ConnectionError`] ever reaches a caller. Stream faults become a
//! one-shot disconnect notification, protocol anomalies are logged and the
//! offending frame is dropped.

use shared::protocol::ProtocolError;
use std::io;

/// Bind or connect failure during session setup. Not retried.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Failure while reading one frame off a connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// EOF, reset or any other I/O failure. Ends the receive loop.
    #[error("stream fault: {0}")]
    Stream(#[from] io::Error),
    /// The length prefix is out of range, so framing is lost. Ends the receive loop.
    #[error("frame length {0} out of range")]
    Oversized(usize),
    /// The payload did not decode. The frame is skipped.
    #[error("protocol anomaly: {0}")]
    Anomaly(#[source] ProtocolError),
}

impl FrameError {
    /// Whether the connection can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Anomaly(_))
    }
}

impl From<ProtocolError> for FrameError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Oversized(len) => FrameError::Oversized(len),
            other => FrameError::Anomaly(other),
        }
    }
}
