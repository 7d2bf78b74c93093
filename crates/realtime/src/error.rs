//! Fleet tracking errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = anyhow::Result<T, Error>;

/// Domain level error type surfaced by the transport client and live channel.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// The request never produced a response (connection refused, reset, DNS).
    #[error("code: network_failure, description: {0}")]
    NetworkFailure(String),

    /// The request did not complete within the configured timeout.
    #[error("code: timeout, description: {0}")]
    Timeout(String),

    /// The backend answered with a non-success status.
    #[error("code: {status}, description: {description}")]
    ApplicationError { status: u16, description: String },

    /// A success response carried a body that could not be decoded.
    #[error("code: invalid_format, description: {0}")]
    InvalidFormat(String),

    /// The live channel handshake failed.
    #[error("code: channel_unavailable, description: {0}")]
    ChannelUnavailable(String),

    /// A send was attempted on a channel that is not open.
    #[error("code: not_connected")]
    NotConnected,

    /// An inbound channel frame could not be interpreted.
    #[error("code: malformed_message, description: {0}")]
    MalformedMessage(String),
}

impl Error {
    /// Returns the stable error code associated with the variant.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::NetworkFailure(_) => "network_failure",
            Self::Timeout(_) => "timeout",
            Self::ApplicationError { .. } => "application_error",
            Self::InvalidFormat(_) => "invalid_format",
            Self::ChannelUnavailable(_) => "channel_unavailable",
            Self::NotConnected => "not_connected",
            Self::MalformedMessage(_) => "malformed_message",
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Build an [`Error::ApplicationError`] from a response status and body.
    #[must_use]
    pub fn application(status: http::StatusCode, body: &[u8]) -> Self {
        let detail = String::from_utf8_lossy(body);
        let description = if detail.trim().is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            detail.trim().to_string()
        };
        Self::ApplicationError { status: status.as_u16(), description }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let inner = err.downcast_ref::<Self>();
        if let Some(inner) = inner {
            tracing::debug!("Error: {err}, caused by: {inner}");
        }

        match inner {
            Some(Self::NetworkFailure(e)) => Self::NetworkFailure(format!("{err}: {e}")),
            Some(Self::Timeout(e)) => Self::Timeout(format!("{err}: {e}")),
            Some(Self::ApplicationError { status, description }) => Self::ApplicationError {
                status: *status,
                description: format!("{err}: {description}"),
            },
            Some(Self::InvalidFormat(e)) => Self::InvalidFormat(format!("{err}: {e}")),
            Some(Self::ChannelUnavailable(e)) => Self::ChannelUnavailable(format!("{err}: {e}")),
            Some(Self::MalformedMessage(e)) => Self::MalformedMessage(format!("{err}: {e}")),
            Some(Self::NotConnected) => Self::NotConnected,
            None => {
                let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>().join(" -> ");
                Self::NetworkFailure(chain)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

#[macro_export]
macro_rules! network_failure {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::NetworkFailure(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::NetworkFailure(format!($err))
    };
}

#[macro_export]
macro_rules! malformed {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::MalformedMessage(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::Error::MalformedMessage(format!($err))
    };
}
