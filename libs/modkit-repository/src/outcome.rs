//! Outcome values returned by every repository operation.
//!
//! An [`Outcome`] carries either a payload with a success-class status or a
//! failure-class status with a human-readable message. The status vocabulary is
//! closed: repositories never produce anything outside [`OutcomeStatus`].

use http::StatusCode;

/// Status vocabulary shared by all repository operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeStatus {
    /// Something was found and is returned.
    Found,
    Created,
    Updated,
    Deleted,
    NoContent,
    /// The requested identifier or predicate matched no row.
    NotFound,
    /// The request itself is unusable (unknown field, invalid patch, ...).
    BadRequest,
    /// Generic domain failure, always accompanied by a message.
    Failure,
}

impl OutcomeStatus {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(
            self,
            OutcomeStatus::Found
                | OutcomeStatus::Created
                | OutcomeStatus::Updated
                | OutcomeStatus::Deleted
                | OutcomeStatus::NoContent
        )
    }

    /// HTTP status code conventionally associated with this outcome.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            OutcomeStatus::Found | OutcomeStatus::Updated | OutcomeStatus::Deleted => {
                StatusCode::OK
            }
            OutcomeStatus::Created => StatusCode::CREATED,
            OutcomeStatus::NoContent => StatusCode::NO_CONTENT,
            OutcomeStatus::NotFound => StatusCode::NOT_FOUND,
            OutcomeStatus::BadRequest => StatusCode::BAD_REQUEST,
            OutcomeStatus::Failure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Rows affected by a mutating operation together with the entity (or entities)
/// it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudResult<T> {
    pub count: u64,
    pub entity: Option<T>,
}

impl<T> CrudResult<T> {
    #[must_use]
    pub fn new(count: u64, entity: T) -> Self {
        Self {
            count,
            entity: Some(entity),
        }
    }

    /// Zero rows, no entity. Used for the not-found branch of mutating operations.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            count: 0,
            entity: None,
        }
    }
}

/// Success/failure carrier returned by repository operations.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Outcome<T> {
    status: OutcomeStatus,
    value: Option<T>,
    message: Option<String>,
}

impl<T> Outcome<T> {
    fn with_value(status: OutcomeStatus, value: T) -> Self {
        Self {
            status,
            value: Some(value),
            message: None,
        }
    }

    fn bare(status: OutcomeStatus) -> Self {
        Self {
            status,
            value: None,
            message: None,
        }
    }

    pub fn found(value: T) -> Self {
        Self::with_value(OutcomeStatus::Found, value)
    }

    pub fn created(value: T) -> Self {
        Self::with_value(OutcomeStatus::Created, value)
    }

    pub fn updated(value: T) -> Self {
        Self::with_value(OutcomeStatus::Updated, value)
    }

    pub fn deleted(value: T) -> Self {
        Self::with_value(OutcomeStatus::Deleted, value)
    }

    pub fn no_content() -> Self {
        Self::bare(OutcomeStatus::NoContent)
    }

    pub fn not_found() -> Self {
        Self::bare(OutcomeStatus::NotFound)
    }

    /// Not-found outcome that still carries a payload, e.g. an empty [`CrudResult`].
    pub fn not_found_with(value: T) -> Self {
        Self::with_value(OutcomeStatus::NotFound, value)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::bare(OutcomeStatus::BadRequest).with_message(message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::bare(OutcomeStatus::Failure).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub fn is_not_found_or_bad_request(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::NotFound | OutcomeStatus::BadRequest
        )
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Transform the payload while keeping status and message.
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        Outcome {
            status: self.status,
            value: self.value.map(f),
            message: self.message,
        }
    }
}

impl<T> From<Option<T>> for Outcome<T> {
    /// `Some` becomes [`OutcomeStatus::Found`], `None` becomes [`OutcomeStatus::NotFound`].
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Outcome::not_found, Outcome::found)
    }
}
