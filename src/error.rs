use std::time::Duration;

/// Errors that cross the lease layer's public boundary.
///
/// Only three kinds ever reach a caller: [`Error::FailedToAcquire`],
/// [`Error::FailedToRelease`] and [`Error::TaskIsLocked`]. Every backend
/// maps its own transport/client errors into one of the first two at the
/// point the error crosses out of the [`crate::Lease`]/[`crate::LeaseFactory`]
/// trait contract; an internal "unknown status" signal used by the quorum
/// release state machine never appears here (see `quorum.rs`).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to acquire lease for {resource}: {reason}")]
    FailedToAcquire { resource: String, reason: String },

    #[error("failed to release lease for {resource}: {reason}")]
    FailedToRelease { resource: String, reason: String },

    #[error("task {function} is locked, retry after {ttl:?}: {message}")]
    TaskIsLocked {
        function: String,
        ttl: Duration,
        message: String,
    },

    #[error("invalid lease resource name: {0:?}")]
    InvalidResource(String),
}

impl Error {
    pub(crate) fn acquire(resource: &str, reason: impl Into<String>) -> Self {
        Error::FailedToAcquire {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn release(resource: &str, reason: impl Into<String>) -> Self {
        Error::FailedToRelease {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }
}
