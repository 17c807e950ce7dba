use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

use crate::controller::RecordKey;

/// A required field left blank in an edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn required(field: &'static str) -> Self {
        Self {
            field,
            message: format!("{field} is required"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Network failure, non-envelope response body or an undecodable payload.
    #[error("{0}")]
    Transport(String),
    /// The backend answered with `success: false`.
    #[error("{}", .0.message)]
    Rejected(ApiError),
    #[error("{}", describe_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("no entry for {0}")]
    UnknownRecord(RecordKey),
    #[error("{0} has not been saved yet")]
    NotPersisted(RecordKey),
    #[error("no confirmation is pending")]
    NoPendingConfirmation,
}

impl ControllerError {
    /// The backend's error code, when the failure came from an envelope.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ControllerError::Rejected(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<ApiError> for ControllerError {
    fn from(value: ApiError) -> Self {
        ControllerError::Rejected(value)
    }
}

impl From<reqwest::Error> for ControllerError {
    fn from(value: reqwest::Error) -> Self {
        ControllerError::Transport(value.to_string())
    }
}

fn describe_fields(errors: &[FieldError]) -> String {
    let messages: Vec<&str> = errors.iter().map(|err| err.message.as_str()).collect();
    format!("invalid record: {}", messages.join(", "))
}
