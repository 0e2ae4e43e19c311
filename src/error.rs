//! Error taxonomy for the realtime sync core.
//!
//! Every network-facing failure is caught at the engine boundary and
//! converted into a [`SyncError`]. Transport and scheduler tasks never see
//! these values; they only log them.

use crate::session::AccountStatus;

/// Errors surfaced by the REST collaborator, the engines and the transport.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend refused the request because the account is not active.
    #[error("account is {0}")]
    AccountBlocked(AccountStatus),

    /// A payload (push frame or REST body) could not be decoded.
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A discussion message was empty after trimming.
    #[error("message content is empty")]
    EmptyMessage,

    /// The operation is reserved for another role.
    #[error("{0} requires the instructor role")]
    NotPermitted(&'static str),

    /// The engine task owning the state is gone (scope torn down).
    #[error("sync engine has shut down")]
    EngineClosed,

    /// Broker-level failure: handshake, ERROR frame, socket error.
    #[error("transport: {0}")]
    Transport(String),

    /// Configuration could not be read or parsed.
    #[error("config: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether retrying later can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Transport(_) | Self::EngineClosed => true,
            Self::Status { status, .. } => *status >= 500,
            Self::AccountBlocked(_)
            | Self::Decode(_)
            | Self::EmptyMessage
            | Self::NotPermitted(_)
            | Self::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
