//! Error types for the re-synchronisation pipeline.
//!
//! Every failure a stage can raise is a variant of [`MigrationError`]; the
//! orchestrator wraps whichever one escapes into a single [`TerminalError`].

use crate::context::ProcessStage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = MigrationError> = std::result::Result<T, E>;

/// Warning and error messages reported by an external capability alongside a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Warning messages.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Error messages.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Diagnostics {
    /// Creates empty diagnostics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a warning message.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Adds an error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Returns true if there is nothing to report.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Error raised by a workspace, either the staged dataset or the destination store.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    /// The error message.
    pub message: String,
    /// Messages reported by the store driver.
    pub diagnostics: Diagnostics,
}

impl StoreError {
    /// Creates a new store error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Error for a table that does not exist.
    #[must_use]
    pub fn table_not_found(table: &str) -> Self {
        Self::new(format!("Table [{table}] does not exist"))
            .with_error(format!("ERROR 000732: Dataset {table} does not exist or is not supported"))
    }

    /// Error for a field that does not exist on a table.
    #[must_use]
    pub fn field_not_found(table: &str, field: &str) -> Self {
        Self::new(format!("Field [{field}] does not exist on table [{table}]"))
            .with_error(format!("ERROR 000728: Field {field} does not exist within table"))
    }

    /// Error for an object that already exists.
    #[must_use]
    pub fn already_exists(name: &str) -> Self {
        Self::new(format!("[{name}] already exists"))
            .with_error(format!("ERROR 000258: Output {name} already exists"))
    }

    /// Adds a driver warning message.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.diagnostics.warnings.push(warning.into());
        self
    }

    /// Adds a driver error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.diagnostics.errors.push(error.into());
        self
    }
}

/// Errors raised while assembling the parameter set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more mandatory parameters were not supplied.
    #[error("Expected parameter(s) {} missing", .0.join(", "))]
    MissingParameters(Vec<String>),

    /// The timezone name is not a known IANA zone.
    #[error("Unknown timezone [{0}]")]
    UnknownTimezone(String),

    /// A parameter was supplied with an unusable value.
    #[error("Invalid value for parameter [{key}]: {reason}")]
    Invalid {
        /// The parameter key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Invalid config file [{path}]: {reason}")]
    File {
        /// The file path.
        path: String,
        /// The underlying problem.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// The closed set of failures a pipeline stage can raise.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// No session token could be obtained.
    #[error("No login token returned from [{portal}] for the credentials supplied: {reason}")]
    Authentication {
        /// The portal URL.
        portal: String,
        /// Why authentication failed.
        reason: String,
    },

    /// The feature service does not advertise a required capability.
    #[error("{capability} capabilities not enabled for survey [{service_url}]")]
    CapabilityMissing {
        /// The feature service URL.
        service_url: String,
        /// The missing capability.
        capability: String,
    },

    /// The remote export job failed or completed with errors.
    #[error("Create replica issues: [{status}] reported by [{job_url}]")]
    JobFailed {
        /// The job status URL.
        job_url: String,
        /// The terminal status reported by the job.
        status: String,
        /// Messages reported by the service.
        diagnostics: Diagnostics,
    },

    /// The remote export job did not finish before the token would expire.
    #[error("Took too long to finish replica job [{job_url}] ({attempts} poll attempts)")]
    Timeout {
        /// The job status URL.
        job_url: String,
        /// Number of polls made.
        attempts: u32,
    },

    /// Destination tables exist but do not cover the staged dataset.
    #[error(
        "Destination holds {found} table(s) with prefix [{prefix}] but {expected} were expected; missing [{}]",
        missing.join(", ")
    )]
    SchemaMismatch {
        /// The configured prefix.
        prefix: String,
        /// Number of prefixed tables the staged dataset needs.
        expected: usize,
        /// Number of prefixed tables found at the destination.
        found: usize,
        /// Prefixed names with no destination counterpart.
        missing: Vec<String>,
    },

    /// The destination store or its schema could not be created.
    #[error("Unable to provision destination [{destination}]: {reason}")]
    DestinationProvisioning {
        /// The destination connection.
        destination: String,
        /// Why provisioning failed.
        reason: String,
        /// Messages reported by the store.
        diagnostics: Diagnostics,
    },

    /// A staged parent row has no counterpart at the destination.
    #[error("missing key: {key} while translating attachments for [{table}]")]
    MissingTranslationKey {
        /// The destination table.
        table: String,
        /// The unmatched local row identifier.
        key: String,
    },

    /// A workspace operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered with something unexpected.
    #[error("Protocol error: {message}")]
    Protocol {
        /// What was wrong with the response.
        message: String,
        /// Messages reported by the service.
        diagnostics: Diagnostics,
    },

    /// The replica archive could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl MigrationError {
    /// Creates a protocol error without remote messages.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Returns the stable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "AuthenticationError",
            Self::CapabilityMissing { .. } => "CapabilityMissingError",
            Self::JobFailed { .. } => "JobFailedError",
            Self::Timeout { .. } => "TimeoutError",
            Self::SchemaMismatch { .. } => "SchemaMismatchError",
            Self::DestinationProvisioning { .. } => "DestinationProvisioningError",
            Self::MissingTranslationKey { .. } => "MissingTranslationKeyError",
            Self::Store(_) => "StoreError",
            Self::Http(_) => "HttpError",
            Self::Protocol { .. } => "ProtocolError",
            Self::Archive(_) => "ArchiveError",
            Self::Io(_) => "IoError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Returns remote diagnostic messages attached to the error, if any.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        let diagnostics = match self {
            Self::Store(err) => &err.diagnostics,
            Self::JobFailed { diagnostics, .. }
            | Self::DestinationProvisioning { diagnostics, .. }
            | Self::Protocol { diagnostics, .. } => diagnostics,
            _ => return None,
        };
        (!diagnostics.is_empty()).then_some(diagnostics)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(diagnostics) = self.diagnostics() {
            map.insert("warnings".to_string(), serde_json::json!(diagnostics.warnings));
            map.insert("errors".to_string(), serde_json::json!(diagnostics.errors));
        }
        map
    }
}

/// The single failure signal the orchestrator hands back to its caller.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Host-native execution error, raised when running inside an interactive host.
    #[error("Execution failed during {stage}: {source}")]
    Execution {
        /// The stage that failed.
        stage: ProcessStage,
        /// The original failure.
        #[source]
        source: MigrationError,
    },

    /// Process termination request for standalone invocation.
    #[error("{message}")]
    Exit {
        /// The stage that failed.
        stage: ProcessStage,
        /// The process exit status.
        code: i32,
        /// The original failure's message.
        message: String,
    },
}

impl TerminalError {
    /// Returns the stage the failure is attributed to.
    #[must_use]
    pub fn stage(&self) -> ProcessStage {
        match self {
            Self::Execution { stage, .. } | Self::Exit { stage, .. } => *stage,
        }
    }

    /// Returns the process exit status to use for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution { .. } => 1,
            Self::Exit { code, .. } => *code,
        }
    }
}
