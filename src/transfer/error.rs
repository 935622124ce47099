//! Error vocabulary for request/reply exchanges.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes, ordered. The first five are connection-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidHeader = 0,
    InvalidMessage = 1,
    ReplyTimeout = 2,
    ReplyNoHandlers = 3,
    ReplyRecipientFailure = 4,
    CommandNotExecuted = 5,
    UnknownError = 6,
}

impl ErrorCode {
    /// True for failures of the exchange itself rather than of the command.
    pub fn is_connection_error(self) -> bool {
        (self as u8) <= ErrorCode::ReplyRecipientFailure as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidHeader => "INVALID_HEADER",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::ReplyTimeout => "REPLY_TIMEOUT",
            ErrorCode::ReplyNoHandlers => "REPLY_NO_HANDLERS",
            ErrorCode::ReplyRecipientFailure => "REPLY_RECIPIENT_FAILURE",
            ErrorCode::CommandNotExecuted => "COMMAND_NOT_EXECUTED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(name)
    }
}

/// Structured error payload carried in a reply.
///
/// Application rejections (duplicate registration, unknown target, ...) and
/// connection failures share this shape so a caller can aggregate them; the
/// [`ErrorCode`] tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    /// Worker that produced the error, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            module_id: None,
            details: None,
        }
    }

    /// The worker's own logic refused the command.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CommandNotExecuted, message)
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidMessage, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownError, message)
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_connection_error(&self) -> bool {
        self.code.is_connection_error()
    }

    /// The receiving address had nobody listening: the worker is gone.
    pub fn is_no_handlers(&self) -> bool {
        self.code == ErrorCode::ReplyNoHandlers
    }
}

/// Failure of an exchange before any reply was produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("No handlers registered for address {address}")]
    NoHandlers { address: String },

    #[error("No reply from {address} within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("Recipient {address} failed: {reason}")]
    RecipientFailure { address: String, reason: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::NoHandlers { .. } => ErrorCode::ReplyNoHandlers,
            TransportError::Timeout { .. } => ErrorCode::ReplyTimeout,
            TransportError::RecipientFailure { .. } => ErrorCode::ReplyRecipientFailure,
            TransportError::InvalidMessage(_) => ErrorCode::InvalidMessage,
        }
    }
}

impl From<TransportError> for CommandError {
    fn from(err: TransportError) -> Self {
        let address = match &err {
            TransportError::NoHandlers { address }
            | TransportError::Timeout { address, .. }
            | TransportError::RecipientFailure { address, .. } => Some(address.clone()),
            TransportError::InvalidMessage(_) => None,
        };
        let mut converted = CommandError::new(err.code(), err.to_string());
        converted.module_id = address;
        converted
    }
}
