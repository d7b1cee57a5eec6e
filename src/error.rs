//! Error taxonomy for the monitor core.
//!
//! Every fallible public operation returns one of these typed errors rather
//! than `anyhow::Error` — callers (the external REST layer, in particular)
//! need to branch on error *kind* to map onto status codes.

use std::fmt;

/// Classification of a probe failure.
///
/// All classes are currently retryable; the scheduler does not branch probe
/// retry policy on class today, but the distinction is preserved because a
/// future retry policy may want it, and because it's useful in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorClass {
    Dial,
    Timeout,
    Protocol,
    Parse,
    Condition,
    Config,
}

impl fmt::Display for ProbeErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeErrorClass::Dial => "dial",
            ProbeErrorClass::Timeout => "timeout",
            ProbeErrorClass::Protocol => "protocol",
            ProbeErrorClass::Parse => "parse",
            ProbeErrorClass::Condition => "condition",
            ProbeErrorClass::Config => "config",
        };
        f.write_str(s)
    }
}

/// A single probe failure. `message` is what ends up verbatim in
/// `ServiceState::last_error` / `Incident::error`.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{class}: {message}")]
pub struct ProbeError {
    pub class: ProbeErrorClass,
    pub message: String,
}

impl ProbeError {
    pub fn new(class: ProbeErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn dial(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorClass::Dial, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorClass::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorClass::Protocol, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorClass::Parse, message)
    }

    pub fn condition(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorClass::Condition, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorClass::Config, message)
    }
}

/// Bad config or request payload.
#[derive(thiserror::Error, Debug, Clone)]
#[error("validation error on {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A requested entity does not exist.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind} {id} not found")]
pub struct NotFoundError {
    pub kind: &'static str,
    pub id: String,
}

impl NotFoundError {
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Failure from the persistence port.
#[derive(thiserror::Error, Debug, Clone)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Outcome of a notification fan-out. Never propagated to the
/// monitor core's caller — logged and swallowed at the call site — but kept
/// as a typed value so the fan-out implementation and its tests can assert
/// on the exact partial/total distinction.
#[derive(thiserror::Error, Debug, Clone)]
pub enum NotificationError {
    #[error("{failed}/{total} notification sinks failed: {details}")]
    Partial {
        failed: usize,
        total: usize,
        details: String,
    },
    #[error("all {total} notification sinks failed: {details}")]
    Total { total: usize, details: String },
}

/// Top-level error for the monitor core's public API. The REST layer (external) maps each variant to a
/// status code: `NotFound` -> 404, `Validation` -> 400, `Conflict` -> 409,
/// `Internal` -> 500.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SentinelError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] PersistenceError),
}
