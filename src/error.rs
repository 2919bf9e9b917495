// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for mesh provisioning.
//!
//! Every remote failure is classified into an [`ErrorKind`] so callers can
//! decide whether to retry, branch, or abort without inspecting messages.
//!
//! # Error Categories
//!
//! | Error Type | Kind | Description |
//! |------------|------|-------------|
//! | `Config` | Config | Missing or invalid input, detected before any network call |
//! | `InvalidUrl` | Structural | Server URL cannot be used (bad scheme, no host, bad port) |
//! | `Decode` | Structural | Remote response body has an unexpected shape |
//! | `Transport` | Transient | Connection refused, reset, request timeout |
//! | `Server` | Transient | 5xx response from the remote store |
//! | `Conflict` | Transient | Revision conflict (409); the next attempt re-reads |
//! | `Timeout` | Transient | Overall retry deadline hit mid-attempt |
//! | `NotReady` | Transient | 404 on a write: a database it needs does not exist yet |
//! | `NotFound` | NotFound | Resource absent (404); used as a branching signal |
//! | `Unauthorized` | Rejected | Credential refused (401/403) |
//! | `Rejected` | Rejected | Any other 4xx refusal |
//! | `RetryExhausted` | kind of last error | Retry bounds reached |
//! | `Context` | kind of wrapped error | Annotation with user / database / server |
//!
//! # Retry Behavior
//!
//! Use [`ProvisionError::is_retryable()`] to decide if an operation should be
//! attempted again. Only [`ErrorKind::Transient`] errors are retried; everything
//! else fails fast.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;

/// Machine-readable classification of a [`ProvisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// May succeed if attempted again (network blips, cluster still starting).
    Transient,
    /// The requested resource does not exist.
    NotFound,
    /// Invalid or missing configuration.
    Config,
    /// Malformed input or response; a programming or deployment error.
    Structural,
    /// The remote store refused the request and will keep refusing it.
    Rejected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::NotFound => write!(f, "not_found"),
            Self::Config => write!(f, "config"),
            Self::Structural => write!(f, "structural"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Errors that can occur while provisioning replication.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A server URL that cannot address a database server.
    #[error("Invalid server URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Network-level failure talking to the remote store.
    #[error("Transport error ({operation}): {message}")]
    Transport {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// 5xx response.
    #[error("Server error ({operation}): HTTP {status}: {message}")]
    Server {
        operation: String,
        status: u16,
        message: String,
    },

    /// The resource does not exist.
    #[error("Not found ({operation}): {message}")]
    NotFound { operation: String, message: String },

    /// Revision conflict on a write.
    #[error("Conflict ({operation}): {message}")]
    Conflict { operation: String, message: String },

    /// Credential refused.
    #[error("Unauthorized ({operation}): HTTP {status}: {message}")]
    Unauthorized {
        operation: String,
        status: u16,
        message: String,
    },

    /// Other 4xx refusal.
    #[error("Rejected ({operation}): HTTP {status}: {message}")]
    Rejected {
        operation: String,
        status: u16,
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Malformed response ({operation}): {message}")]
    Decode { operation: String, message: String },

    /// A write hit a 404. During cluster start-up `_users` or a replicated
    /// database may not exist yet.
    #[error("Not ready ({operation}): {message}")]
    NotReady { operation: String, message: String },

    /// An attempt was cut off by the overall retry deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// Retry bounds reached; carries the last underlying error.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: Box<ProvisionError>,
    },

    /// An error annotated with what was being provisioned.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Create a transport error from a reqwest error.
    pub fn transport(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a transport error without source.
    pub fn transport_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let operation = operation.into();
        let message = message.into();
        match status {
            404 => Self::NotFound { operation, message },
            409 => Self::Conflict { operation, message },
            401 | 403 => Self::Unauthorized {
                operation,
                status,
                message,
            },
            500..=599 => Self::Server {
                operation,
                status,
                message,
            },
            _ => Self::Rejected {
                operation,
                status,
                message,
            },
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Reclassify the error of a write call.
    ///
    /// Not-found only branches on lookups. On a write it means a prerequisite
    /// is still missing, which is worth waiting for.
    pub fn into_write_error(self) -> Self {
        match self {
            Self::NotFound { operation, message } => Self::NotReady { operation, message },
            other => other,
        }
    }

    /// Wrap this error with a description of what was being provisioned.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error, looking through wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidUrl { .. } => ErrorKind::Structural,
            Self::Decode { .. } => ErrorKind::Structural,
            Self::Transport { .. } => ErrorKind::Transient,
            Self::Server { .. } => ErrorKind::Transient,
            Self::Conflict { .. } => ErrorKind::Transient,
            Self::Timeout { .. } => ErrorKind::Transient,
            Self::NotReady { .. } => ErrorKind::Transient,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Rejected,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::RetryExhausted { source, .. } => source.kind(),
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Check if this error is the remote "resource absent" signal.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Attach context to the error of a [`ProvisionResult`].
pub trait ResultExt<T> {
    /// Wrap the error (if any) with a lazily built context string.
    fn context<F, S>(self, f: F) -> ProvisionResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for ProvisionResult<T> {
    fn context<F, S>(self, f: F) -> ProvisionResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}
