//! Error types for the ShinyDB client SDK.

use thiserror::Error;

/// Client error. The set is closed: the resilient layer classifies every
/// variant as retryable or permanent, so downstream code can match
/// exhaustively.
#[derive(Error, Debug)]
pub enum Error {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Connection reset: {0}")]
  ConnectionReset(String),

  #[error("Connection refused: {0}")]
  ConnectionRefused(String),

  #[error("Network error: {0}")]
  NetworkError(String),

  #[error("Operation timed out")]
  Timeout,

  #[error("Read timed out")]
  ReadTimeout,

  #[error("Write timed out")]
  WriteTimeout,

  #[error("Invalid response: {0}")]
  InvalidResponse(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("Protocol error: {0}")]
  ProtocolError(String),

  #[error("Pipeline full")]
  PipelineFull,

  #[error("Buffer overflow")]
  BufferOverflow,

  #[error("Server error: {0}")]
  ServerError(String),

  #[error("Service unavailable: {0}")]
  ServiceUnavailable(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Permission denied: {0}")]
  PermissionDenied(String),

  #[error("Operation failed: {0}")]
  OperationFailed(String),

  #[error("Document not found")]
  DocumentNotFound,

  #[error("Update failed: {0}")]
  UpdateFailed(String),

  #[error("Delete failed: {0}")]
  DeleteFailed(String),

  #[error("Query failed: {0}")]
  QueryFailed(String),

  #[error("Aggregate failed: {0}")]
  AggregateFailed(String),

  #[error("Scan failed: {0}")]
  ScanFailed(String),

  #[error("No operation specified")]
  NoOperation,

  #[error("No space specified")]
  NoSpaceSpecified,
}

impl Error {
  /// Whether the resilient wrapper may retry after this error.
  ///
  /// Transient transport, timeout, backpressure and server-side faults are
  /// retryable; protocol, validation and auth faults are permanent.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Error::ConnectionFailed(_)
        | Error::ConnectionReset(_)
        | Error::ConnectionRefused(_)
        | Error::NetworkError(_)
        | Error::Timeout
        | Error::ReadTimeout
        | Error::WriteTimeout
        | Error::PipelineFull
        | Error::BufferOverflow
        | Error::ServerError(_)
        | Error::ServiceUnavailable(_)
    )
  }

  /// Whether this error came from a deadline expiring.
  pub fn is_timeout(&self) -> bool {
    matches!(self, Error::Timeout | Error::ReadTimeout | Error::WriteTimeout)
  }

  /// Whether the connection must be re-established before another attempt.
  pub fn is_connection_loss(&self) -> bool {
    matches!(
      self,
      Error::ConnectionFailed(_)
        | Error::ConnectionReset(_)
        | Error::ConnectionRefused(_)
        | Error::NetworkError(_)
    )
  }
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self {
    use std::io::ErrorKind;
    match e.kind() {
      ErrorKind::ConnectionRefused => Error::ConnectionRefused(e.to_string()),
      ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
        Error::ConnectionReset(e.to_string())
      }
      ErrorKind::TimedOut => Error::Timeout,
      _ => Error::NetworkError(e.to_string()),
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::InvalidResponse(e.to_string())
  }
}

impl From<rmp_serde::encode::Error> for Error {
  fn from(e: rmp_serde::encode::Error) -> Self {
    Error::InvalidRequest(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
