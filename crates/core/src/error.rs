//! Fault model shared by the launcher, step engine and chunk loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the batch engine.
pub type BatchResult<T> = Result<T, BatchError>;

/// Category tag carried by item faults, matched by skip policies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    /// Data failed a validation rule.
    Validation,
    /// Raw input could not be parsed.
    Parse,
    /// A transformation could not be applied.
    Transform,
    /// Anything else (I/O, sink failures, unexpected errors).
    Other,
}

impl FaultCategory {
    /// Categories describing bad input data rather than a broken system.
    pub const DATA: [FaultCategory; 3] = [Self::Validation, Self::Parse, Self::Transform];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Parse => "parse",
            Self::Transform => "transform",
            Self::Other => "other",
        }
    }
}

impl core::fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-item failure raised by a source, transform or sink.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category} error: {message}")]
pub struct ItemFault {
    pub category: FaultCategory,
    pub message: String,
}

impl ItemFault {
    pub fn new(category: FaultCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::Validation, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::Parse, message)
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::Transform, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::Other, message)
    }
}

/// Batch engine error.
///
/// `Action` and `Item` abort the current step attempt and are retried by the
/// step engine. `NotFound` and `Config` surface at submission time, before any
/// execution record exists. `Repository` covers storage failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    /// A task step body failed.
    #[error("{0}")]
    Action(String),

    /// A source, transform or sink failed during chunk processing.
    #[error(transparent)]
    Item(#[from] ItemFault),

    /// An unknown job name or execution id was requested.
    #[error("not found: {0}")]
    NotFound(String),

    /// A job or step definition is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The execution repository failed.
    #[error("repository error: {0}")]
    Repository(String),
}

impl BatchError {
    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Whether the step engine may spend another attempt on this fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Action(_) | Self::Item(_))
    }

    /// The category tag of an item fault, if this is one.
    pub fn category(&self) -> Option<FaultCategory> {
        match self {
            Self::Item(fault) => Some(fault.category),
            _ => None,
        }
    }
}
