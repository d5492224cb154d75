use std::{future::Future, time::Duration};

use sea_orm::DbErr;
use thiserror::Error;
use zel_core::prelude::ResourceError;

/// Failures surfaced by every core operation.
///
/// `DbError` and `Timeout` are storage failures: the caller should revert
/// any optimistic state it applied. Everything else is rejected before the
/// store is mutated.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("storage did not answer within {0:?}")]
    Timeout(Duration),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("unauthorized: {0}")]
    NotAuthorized(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid input: {0}")]
    Validation(String),
}

impl ServiceError {
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, ServiceError::DbError(_) | ServiceError::Timeout(_))
    }

    /// Error mapper for row updates: a row that disappeared before the
    /// `UPDATE` ran is reported as missing, not as a storage failure.
    pub(crate) fn on_update(entity: &'static str) -> impl FnOnce(DbErr) -> ServiceError {
        move |error| match error {
            DbErr::RecordNotUpdated => ServiceError::NotFound(entity),
            other => ServiceError::DbError(other),
        }
    }
}

impl From<ServiceError> for ResourceError {
    fn from(error: ServiceError) -> Self {
        if error.is_storage_failure() {
            ResourceError::infra(error)
        } else {
            ResourceError::app(error)
        }
    }
}

/// Runs `operation`, giving up with [`ServiceError::Timeout`] once `limit`
/// has elapsed.
pub async fn with_deadline<T, F>(limit: Duration, operation: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| ServiceError::Timeout(limit))?
}
