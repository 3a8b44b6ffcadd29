//! Structured outcome returned by the service layer.

use serde::Serialize;

use crate::{Result, SciError};

/// Outcome category of a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ok,
    NotFound,
    Validation,
    Conflict,
    Cancelled,
    Failure,
}

impl ResultCode {
    /// Classify an error.
    pub fn of(error: &SciError) -> Self {
        match error {
            SciError::NotFound(_) => Self::NotFound,
            SciError::Validation(_) | SciError::Config(_) => Self::Validation,
            SciError::UniqueViolation(_)
            | SciError::Concurrency(_)
            | SciError::ConcurrencyExhausted { .. } => Self::Conflict,
            SciError::Cancelled => Self::Cancelled,
            _ => Self::Failure,
        }
    }
}

/// Success flag, payload and messages of a service call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceResult<T> {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub code: ResultCode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl<T> ServiceResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            succeeded: true,
            data: Some(data),
            code: ResultCode::Ok,
            messages: Vec::new(),
        }
    }

    pub fn failure(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            data: None,
            code,
            messages: vec![message.into()],
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::failure(ResultCode::NotFound, format!("{} not found", what.into()))
    }

    pub fn from_error(error: &SciError) -> Self {
        Self::failure(ResultCode::of(error), error.to_string())
    }

    /// Append a message, keeping the outcome.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ResultCode::NotFound
    }
}

impl<T> From<Result<T>> for ServiceResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::from_error(&e),
        }
    }
}

/// Turn an optional lookup into a result, `None` becoming NotFound.
pub(crate) fn found<T>(result: Result<Option<T>>, what: &str) -> ServiceResult<T> {
    match result {
        Ok(Some(data)) => ServiceResult::success(data),
        Ok(None) => ServiceResult::not_found(what),
        Err(e) => ServiceResult::from_error(&e),
    }
}
