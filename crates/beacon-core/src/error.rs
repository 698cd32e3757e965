//! Centralized error types for Beacon.

use thiserror::Error;

use crate::model::ConnectionId;
use crate::transport::DeliveryError;

/// Main error type for core operations.
#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Connection not open: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection already open: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Malformed report: {0}")]
    MalformedReport(String),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type BeaconResult<T> = Result<T, BeaconError>;

impl BeaconError {
    /// Create a malformed report error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedReport(msg.into())
    }

    /// Whether the error was caused by the client's payload rather than
    /// by connection lifecycle.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Self::MalformedReport(_))
    }
}
