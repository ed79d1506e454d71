//! Error types.
//!
//! `ClientError` is what the gateway and credential storage return.
//! `StoreError` is the flat `{message, code, details}` shape the stores keep
//! for views to display, built from a `ClientError` or raised by a store itself.

use serde::Serialize;
use serde_json::Value;

pub type ClientResult<T> = Result<T, ClientError>;

/// Message shown for every transport failure. The underlying cause goes into `details`.
pub const TRANSPORT_MESSAGE: &str = "Could not reach the server. Check the connection and try again.";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  #[error("{}", TRANSPORT_MESSAGE)]
  Transport(String),

  /// `success: false` envelope or non-2xx status. `message` is user-facing text.
  #[error("{message}")]
  Api {
    status: Option<u16>,
    message: String,
    details: Option<Value>,
  },

  #[error("{0}")]
  Unauthorized(String),

  #[error("{0}")]
  MissionNotFinished(String),

  #[error("{0}")]
  Validation(String),

  #[error("Unexpected response from server: {0}")]
  Decode(String),

  #[error("Local storage error: {0}")]
  Storage(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      ClientError::Decode(e.to_string())
    } else {
      ClientError::Transport(e.to_string())
    }
  }
}

impl ClientError {
  pub fn code(&self) -> &'static str {
    match self {
      ClientError::Transport(_) => "transport",
      ClientError::Api { .. } => "api",
      ClientError::Unauthorized(_) => "unauthorized",
      ClientError::MissionNotFinished(_) => "mission_not_finished",
      ClientError::Validation(_) => "validation",
      ClientError::Decode(_) => "decode",
      ClientError::Storage(_) => "storage",
    }
  }
}

/// Error as retained by a store until cleared or superseded by a success.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoreError {
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<Value>,
}

impl StoreError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into(), code: None, details: None }
  }

  pub fn with_code(message: impl Into<String>, code: &str) -> Self {
    Self { message: message.into(), code: Some(code.to_string()), details: None }
  }

  pub fn is_code(&self, code: &str) -> bool {
    self.code.as_deref() == Some(code)
  }
}

impl std::fmt::Display for StoreError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.code {
      Some(code) => write!(f, "{} ({})", self.message, code),
      None => f.write_str(&self.message),
    }
  }
}

impl std::error::Error for StoreError {}

impl From<&ClientError> for StoreError {
  fn from(e: &ClientError) -> Self {
    let details = match e {
      ClientError::Transport(cause) | ClientError::Decode(cause) => Some(Value::String(cause.clone())),
      ClientError::Api { status, details, .. } => match (status, details) {
        (_, Some(d)) => Some(d.clone()),
        (Some(s), None) => Some(serde_json::json!({ "status": s })),
        (None, None) => None,
      },
      ClientError::Storage(io) => Some(Value::String(io.to_string())),
      _ => None,
    };
    Self { message: e.to_string(), code: Some(e.code().to_string()), details }
  }
}

impl From<ClientError> for StoreError {
  fn from(e: ClientError) -> Self {
    StoreError::from(&e)
  }
}
