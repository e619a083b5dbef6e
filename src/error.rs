//! Custom error types for the bridge.
//!
//! `BridgeError` is the single error type returned by the library. It follows the
//! taxonomy of the device protocol:
//!
//! - **Transport failures** (`Transport`, `ShortResponse`, `Timeout`, `Io`): the
//!   connection could not be opened, a write or read failed, or the device answered
//!   with fewer bytes than the echoed mnemonic.
//! - **Decode failures** (`Decode`): the response payload could not be turned into
//!   the numeric or enumerated form the control point expects.
//! - **Request errors** (`InvalidValue`, `ReadOnly`, `UnknownPoint`): an external write
//!   was rejected before anything reached the wire.
//! - **Configuration errors** (`Config`, `Configuration`).
//!
//! Translation table misses are not errors; they resolve to a fallback label in
//! [`crate::tables`].

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the bridge error type.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Stage of an exchange at which a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    /// Opening the TCP connection.
    Connect,
    /// Writing and flushing the request frame.
    Write,
    /// Waiting for the response bytes.
    Read,
}

impl std::fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeStage::Connect => write!(f, "connect"),
            ExchangeStage::Write => write!(f, "write"),
            ExchangeStage::Read => write!(f, "read"),
        }
    }
}

/// Primary error type for every bridge operation.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport failure during {mnemonic}: {reason}")]
    Transport { mnemonic: String, reason: String },

    #[error("Short response to {mnemonic}: received {received:?}")]
    ShortResponse { mnemonic: String, received: String },

    #[error("Timed out in {stage} stage of {mnemonic} after {after:?}")]
    Timeout {
        mnemonic: String,
        stage: ExchangeStage,
        after: Duration,
    },

    #[error("Cannot decode {mnemonic} response {payload:?} as {expected}")]
    Decode {
        mnemonic: String,
        payload: String,
        expected: &'static str,
    },

    #[error("Invalid value for '{point}': {reason}")]
    InvalidValue { point: String, reason: String },

    #[error("Control point '{0}' is read-only")]
    ReadOnly(String),

    #[error("Unknown control point '{0}'")]
    UnknownPoint(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scheduler is no longer running")]
    SchedulerClosed,
}

impl BridgeError {
    /// True for failures to complete an exchange on the wire.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport { .. }
                | BridgeError::ShortResponse { .. }
                | BridgeError::Timeout { .. }
                | BridgeError::Io(_)
        )
    }

    /// True when the device answered but the payload had the wrong shape.
    pub fn is_decode(&self) -> bool {
        matches!(self, BridgeError::Decode { .. })
    }

    pub(crate) fn transport(mnemonic: &str, reason: impl std::fmt::Display) -> Self {
        BridgeError::Transport {
            mnemonic: mnemonic.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(mnemonic: &str, payload: &str, expected: &'static str) -> Self {
        BridgeError::Decode {
            mnemonic: mnemonic.to_string(),
            payload: payload.to_string(),
            expected,
        }
    }

    pub(crate) fn invalid(point: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::InvalidValue {
            point: point.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::Config(Box::new(err))
    }
}
