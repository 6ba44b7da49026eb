use thiserror::Error;

/// Error taxonomy for the delivery pipeline.
///
/// Only `Transient` is worth retrying; everything else is either a caller
/// mistake or a definitive answer. Duplicate deliveries and stale acks are
/// deliberately *not* errors anywhere in this crate.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The producer handed us a notification that fails validation.
    /// Rejected synchronously, never enqueued.
    #[error("invalid notification: {0}")]
    InvalidNotification(String),

    /// A backing store (notification, queue or preference store) was
    /// unreachable. Callers retry with backoff before surfacing this.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// The presented credentials did not resolve to a recipient identity.
    #[error("unauthorized")]
    Unauthorized,

    /// The referenced notification does not exist (REST surface only;
    /// stale acks over the session protocol are no-ops instead).
    #[error("notification not found")]
    NotFound,
}

impl CourierError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CourierError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
