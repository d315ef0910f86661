//! Tagged success/failure results returned by every client operation.
//!
//! Callers branch on [`Outcome::Success`] or [`Outcome::Failure`] instead of
//! matching on error types. A failure only carries the stringified error.

use std::fmt;
use std::future::Future;

use tracing::warn;

/// Outcome of a client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation succeeded with a payload.
    Success(T),
    /// The operation failed; the reason is the stringified error.
    Failure(String),
}

impl<T> Outcome<T> {
    /// Build a failure from anything printable.
    pub fn failure(reason: impl fmt::Display) -> Self {
        Outcome::Failure(reason.to_string())
    }

    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Whether this is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Borrow the success payload, if any.
    pub fn payload(&self) -> Option<&T> {
        match self {
            Outcome::Success(payload) => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    /// Take the success payload, if any.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Outcome::Success(payload) => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    /// Borrow the failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(reason) => Some(reason),
        }
    }

    /// Map the success payload, leaving failures untouched.
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(payload) => Outcome::Success(f(payload)),
            Outcome::Failure(reason) => Outcome::Failure(reason),
        }
    }

    /// Convert into a standard result with the reason as error.
    pub fn into_result(self) -> std::result::Result<T, String> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Failure(reason) => Err(reason),
        }
    }
}

impl<T, E: fmt::Display> From<std::result::Result<T, E>> for Outcome<T> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(payload) => Outcome::Success(payload),
            Err(e) => Outcome::failure(e),
        }
    }
}

/// Await an operation and translate its error into a [`Outcome::Failure`].
///
/// This is the only place errors cross into outcomes; `op` names the
/// operation in the log line emitted on failure.
pub async fn capture<T, F>(op: &'static str, fut: F) -> Outcome<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match fut.await {
        Ok(payload) => Outcome::Success(payload),
        Err(e) => {
            warn!(operation = op, error = %e, "Pub/Sub operation failed");
            Outcome::failure(e)
        }
    }
}
