use crate::error::{ErrorKind, FetchError};

/// Terminal result of one fetch task, delivered exactly once per listener.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Success(T),
    Failed(FetchError),

    /// The task was cancelled before producing a result.
    Cancelled,
}

impl<T> FetchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchOutcome::Cancelled)
    }

    /// Error category of a failed outcome.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            FetchOutcome::Failed(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn success(self) -> Option<T> {
        match self {
            FetchOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Success(value) => FetchOutcome::Success(f(value)),
            FetchOutcome::Failed(e) => FetchOutcome::Failed(e),
            FetchOutcome::Cancelled => FetchOutcome::Cancelled,
        }
    }
}

impl<T> From<Result<T, FetchError>> for FetchOutcome<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => FetchOutcome::Success(value),
            Err(e) => FetchOutcome::Failed(e),
        }
    }
}
