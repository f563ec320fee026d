//! Error types for the MS/TP client.

use std::fmt;

/// Errors raised while validating or loading a [`SessionConfig`](crate::SessionConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing 'address' in the [mstp] configuration")]
    MissingAddress,

    #[error("Missing 'interface' in the [mstp] configuration")]
    MissingInterface,

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while loading the object-type schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid access '{access}' for object type '{object_type}' (expected \"R\" or \"R/W\")")]
    InvalidAccess { object_type: String, access: String },

    #[error("Unknown {field} '{value}' for object type '{object_type}'")]
    UnknownType {
        object_type: String,
        field: &'static str,
        value: String,
    },
}

/// Errors raised by session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to launch protocol engine: {0}")]
    EngineLaunch(String),

    #[error("Session not started")]
    NotStarted,
}

/// Failure reported for a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFailure {
    /// The device answered with a BACnet Error PDU
    Error { class: u32, code: u32 },
    /// The device rejected the request
    Reject(u8),
    /// The transaction was aborted
    Abort(u8),
    /// No acknowledgment arrived before the deadline
    Timeout,
    /// The link failed to carry the request
    Link(String),
    /// The engine stopped while the transaction was in flight
    EngineStopped,
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionFailure::Error { class, code } => {
                write!(f, "error response (class {}, code {})", class, code)
            }
            TransactionFailure::Reject(reason) => write!(f, "request rejected (reason {})", reason),
            TransactionFailure::Abort(reason) => write!(f, "request aborted (reason {})", reason),
            TransactionFailure::Timeout => write!(f, "no response before timeout"),
            TransactionFailure::Link(e) => write!(f, "link error: {}", e),
            TransactionFailure::EngineStopped => write!(f, "engine stopped"),
        }
    }
}

/// Runtime errors returned by discovery, transactions and enumeration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Session not started; call ensure_started() first")]
    NotStarted,

    #[error("Invalid property '{property}' for object type '{object_type}'")]
    UnknownProperty {
        object_type: String,
        property: String,
    },

    #[error("Object instance {0} exceeds the 22-bit limit (4194303)")]
    InvalidInstance(u32),

    #[error("Device {0} not found in cache. Run discovery first.")]
    UnknownDevice(u32),

    #[error("Value cast error: {0}")]
    Cast(String),

    #[error("Transport error: {0}")]
    Transport(TransactionFailure),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Object enumeration timed out after {0:?}")]
    EnumerationTimeout(std::time::Duration),

    #[error("Object enumeration aborted: {0}")]
    EnumerationProtocol(String),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
