//! Error taxonomy for the migration engine
//!
//! Plan-time conflicts (picklist, state category) are not errors; they are
//! recorded as `PlanIssue` data on the plan. Everything that can stop or
//! degrade a run goes through `MigrationError`.

use std::fmt;

/// Errors produced by the migration engine
#[derive(Debug, Clone)]
pub enum MigrationError {
    /// Bad invocation configuration. Raised before any I/O is attempted.
    Config(String),
    /// Network or auth failure while reading a model
    Fetch { url: String, message: String },
    /// Process (or a required sub-resource) does not exist
    NotFound { resource: String },
    /// A referenced user or group could not be resolved on the target.
    /// Tolerable per options on rule import and field default values.
    IdentityResolution { operation: String, message: String },
    /// Generic apply failure (network, validation, permission). Always fatal.
    Write { operation: String, message: String },
    /// User-initiated cancellation. Not a failure.
    Cancelled,
    /// A second run was started while one is active
    AlreadyRunning,
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(message) => write!(f, "Invalid configuration: {}", message),
            Self::Fetch { url, message } => write!(f, "Failed to fetch from {}: {}", url, message),
            Self::NotFound { resource } => write!(f, "Not found: {}", resource),
            Self::IdentityResolution { operation, message } => {
                write!(f, "Identity resolution failed for {}: {}", operation, message)
            }
            Self::Write { operation, message } => {
                write!(f, "Write failed for {}: {}", operation, message)
            }
            Self::Cancelled => write!(f, "Migration cancelled by user"),
            Self::AlreadyRunning => write!(f, "A migration is already running"),
        }
    }
}

impl std::error::Error for MigrationError {}

impl MigrationError {
    /// Whether this error can be downgraded to a skipped operation when the
    /// matching continue-on-failure option is set
    pub fn is_tolerable(&self) -> bool {
        matches!(self, Self::IdentityResolution { .. })
    }
}

pub type EngineResult<T> = Result<T, MigrationError>;
