//! Error handling for the bot client.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::types::ConnectionState;

/// The main result type used throughout the client.
pub type BotResult<T> = Result<T, BotError>;

/// Error type for all client operations.
#[derive(Error, Debug)]
pub enum BotError {
    /// A request was issued while the client was not connected.
    #[error("Not connected to the bot server")]
    NotConnected,

    /// `connect` was called while a connection exists or is being dialed.
    #[error("Client is already {state}")]
    AlreadyConnected { state: ConnectionState },

    /// No response arrived within the request window.
    #[error("Request {request_id} timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        request_id: String,
    },

    /// A dial did not complete within the connect window.
    #[error("Connecting to {url} timed out after {duration:?}")]
    ConnectTimeout { url: String, duration: Duration },

    /// The host answered with `status: "error"`.
    #[error("Remote error: {message}")]
    Remote { message: String },

    /// The connection went away while the request was in flight.
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// Socket-level failure.
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// Serialization/deserialization errors
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The request payload could not be turned into a frame.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The background connection task is gone.
    #[error("Client has shut down")]
    Shutdown,

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<tungstenite::Error> for BotError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::connection_closed(e.to_string())
            }
            other => Self::websocket(other.to_string()),
        }
    }
}

impl BotError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a remote error from the host-provided message.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a request timeout error.
    pub fn timeout(duration: Duration, request_id: impl Into<String>) -> Self {
        Self::Timeout {
            duration,
            request_id: request_id.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}
