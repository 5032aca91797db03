//! Error types for mastery operations.
//!
//! Errors carry structured codes, a retry classification used by the sync
//! coordinator, and human-readable causes for the UI layer.

use std::collections::HashMap;
use strum::{Display, EnumString};
use thiserror::Error;

/// Result type alias for mastery operations.
pub type MasteryResult<T> = Result<T, MasteryError>;

/// Status codes reported by the remote document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RemoteErrorCode {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Cancelled,
    PermissionDenied,
    Unauthenticated,
    InvalidArgument,
    NotFound,
    Unknown,
}

impl RemoteErrorCode {
    /// Whether the store reports this condition as temporary.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::DeadlineExceeded | Self::ResourceExhausted | Self::Aborted
        )
    }
}

/// Main error type for all mastery operations.
#[derive(Error, Debug)]
pub enum MasteryError {
    /// The remote document store rejected or failed an operation.
    #[error("Remote store error ({remote_code}): {message}")]
    Remote {
        message: String,
        code: ErrorCode,
        remote_code: RemoteErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport-level failure (timeout, connection reset, offline).
    #[error("Network error: {message}")]
    Network {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        details: HashMap<String, String>,
        suggestion: Option<String>,
    },

    /// A course, quiz, question or trash item could not be found.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        resource_id: Option<String>,
    },

    /// Local durable storage failed.
    #[error("Local store error: {message}")]
    LocalStore {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A save could not be persisted, after retries where applicable.
    #[error("Save failed after {attempts} attempt(s): {message}")]
    SaveFailed {
        message: String,
        code: ErrorCode,
        attempts: usize,
        #[source]
        source: Box<MasteryError>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parse error.
    #[error("Parse error: {message}")]
    Parse { message: String, code: ErrorCode },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,

    // Items (ITEM_xxx)
    ItemNotFound,

    // Remote store (REM_xxx)
    RemoteUnavailable,
    RemoteRejected,
    RemotePermissionDenied,

    // Network (NET_xxx)
    NetTimeout,
    NetConnectionFailed,

    // Local store (LOC_xxx)
    LocalOperationFailed,

    // Sync (SYNC_xxx)
    SyncSaveFailed,
    SyncRetriesExhausted,

    // Parse (PARSE_xxx)
    ParseInvalidJson,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ItemNotFound => "ITEM_001",
            ErrorCode::RemoteUnavailable => "REM_001",
            ErrorCode::RemoteRejected => "REM_002",
            ErrorCode::RemotePermissionDenied => "REM_003",
            ErrorCode::NetTimeout => "NET_001",
            ErrorCode::NetConnectionFailed => "NET_002",
            ErrorCode::LocalOperationFailed => "LOC_001",
            ErrorCode::SyncSaveFailed => "SYNC_001",
            ErrorCode::SyncRetriesExhausted => "SYNC_002",
            ErrorCode::ParseInvalidJson => "PARSE_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

/// Message fragments that mark an otherwise unclassified failure as network-class.
const NETWORK_MARKERS: [&str; 6] = ["timeout", "timed out", "connection", "offline", "network", "fetch"];

impl MasteryError {
    /// Create a remote store error with the given status code.
    pub fn remote(remote_code: RemoteErrorCode, message: impl Into<String>) -> Self {
        let code = match remote_code {
            RemoteErrorCode::PermissionDenied | RemoteErrorCode::Unauthenticated => {
                ErrorCode::RemotePermissionDenied
            }
            c if c.is_transient() => ErrorCode::RemoteUnavailable,
            _ => ErrorCode::RemoteRejected,
        };
        Self::Remote {
            message: message.into(),
            code,
            remote_code,
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: ErrorCode::NetConnectionFailed,
            source: None,
        }
    }

    /// Create a network timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: ErrorCode::NetTimeout,
            source: None,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
            suggestion: None,
        }
    }

    /// Create a validation error with suggestion.
    pub fn validation_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a not found error for a named resource.
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        let id = id.into();
        Self::NotFound {
            message: format!("{} with id '{}' not found", kind, id),
            code: ErrorCode::ItemNotFound,
            resource_id: Some(id),
        }
    }

    /// Create a local store error.
    pub fn local_store(message: impl Into<String>) -> Self {
        Self::LocalStore {
            message: message.into(),
            code: ErrorCode::LocalOperationFailed,
            source: None,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseInvalidJson,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap a classified failure as a user-facing save failure.
    pub fn save_failed(cause: MasteryError, attempts: usize) -> Self {
        let code = if cause.is_retryable() {
            ErrorCode::SyncRetriesExhausted
        } else {
            ErrorCode::SyncSaveFailed
        };
        Self::SaveFailed {
            message: cause.user_message(),
            code,
            attempts,
            source: Box::new(cause),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Remote { code, .. } => *code,
            Self::Network { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::LocalStore { code, .. } => *code,
            Self::SaveFailed { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            Self::Serialization(_) => ErrorCode::ParseInvalidJson,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Transient remote codes and any network-class failure are retryable.
    /// Remote failures with an unknown code are retryable only when their
    /// message looks like a transport problem.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Remote {
                remote_code,
                message,
                ..
            } => {
                remote_code.is_transient()
                    || (*remote_code == RemoteErrorCode::Unknown && looks_like_network(message))
            }
            Self::Io(err) => looks_like_network(&err.to_string()),
            _ => false,
        }
    }

    /// Human-readable cause suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote {
                remote_code: RemoteErrorCode::PermissionDenied | RemoteErrorCode::Unauthenticated,
                ..
            } => "You don't have permission to save this data. Please sign in again.".to_string(),
            Self::Remote {
                remote_code: RemoteErrorCode::InvalidArgument,
                ..
            } => "The data could not be saved because it was rejected as invalid.".to_string(),
            Self::Remote {
                remote_code: RemoteErrorCode::NotFound,
                ..
            } => "Your account data could not be found on the server.".to_string(),
            Self::SaveFailed { message, .. } => message.clone(),
            err if err.is_retryable() => {
                "The server could not be reached. Your changes are kept on this device.".to_string()
            }
            other => format!("Saving failed: {}", other),
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Remote {
                remote_code: RemoteErrorCode::PermissionDenied | RemoteErrorCode::Unauthenticated,
                ..
            } => Some("Please sign out and sign in again"),
            Self::Network { .. } => Some("Please check your internet connection"),
            Self::NotFound { .. } => Some("The item may have been deleted or already purged from trash"),
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::SaveFailed { .. } => Some("Your changes are kept locally and will be saved on the next attempt"),
            _ => None,
        }
    }
}

fn looks_like_network(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl From<rusqlite::Error> for MasteryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::LocalStore {
            message: err.to_string(),
            code: ErrorCode::LocalOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}
