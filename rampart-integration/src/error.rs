//! The error taxonomy shared by every Rampart crate.
use thiserror::Error;

/// All core-level errors reduce to one of these eight variants. Each trader, adapter and the job
/// runner map their own internal failure modes onto this taxonomy at their public boundary.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// Input validation failure.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Missing uid/order/name.
    #[error("not exist: {0}")]
    NotExist(String),

    /// Duplicate uid/name/subscription.
    #[error("already exists: {0}")]
    Exist(String),

    /// Operation attempted on a closed component.
    #[error("closed")]
    Closed,

    /// Exchange refused the order due to insufficient funds.
    #[error("insufficient funds: {0}")]
    NoFund(String),

    /// Transient error, retried internally; surfaced only if retries are exhausted.
    #[error("rate limited")]
    RateLimited,

    /// Propagated from a cancelled context; carries the cancellation cause.
    #[error("cancelled: {0}")]
    Canceled(CancelCause),

    /// Anything else. Always logged with its source at the call site.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_exist(msg: impl Into<String>) -> Self {
        Self::NotExist(msg.into())
    }

    pub fn exist(msg: impl Into<String>) -> Self {
        Self::Exist(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn no_fund(msg: impl Into<String>) -> Self {
        Self::NoFund(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Distinguishes why a job's context was cancelled: an operator pause, an operator cancel, or
/// process shutdown.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
pub enum CancelCause {
    Pause,
    Cancel,
    Shutdown,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pause => write!(f, "paused"),
            Self::Cancel => write!(f, "cancelled"),
            Self::Shutdown => write!(f, "process shutdown"),
        }
    }
}

/// Marker used by long-lived supervisory loops to decide whether an error should end the loop.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}

impl Unrecoverable for Error {
    fn is_unrecoverable(&self) -> bool {
        !matches!(self, Self::RateLimited | Self::Canceled(CancelCause::Pause))
    }
}
