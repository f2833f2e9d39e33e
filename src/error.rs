//! Common errors across the g5nr-prep crate
//!
//! Errors fall into two families. [`ConfigError`] covers problems that make the
//! whole run invalid (an unknown field name, a cyclic derivation, a bad time window)
//! and must be raised before any output is produced. [`StepError`] covers problems
//! with a single timestamp (a missing source file, a failed interpolation) which
//! abort that timestamp only.
use std::path::PathBuf;

use chrono::NaiveDateTime;

/// Errors in the run configuration or the field registry. All of these are fatal
/// for the entire run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Field '{0}' has no mapping in the field registry")]
    UnmappedField(String),
    #[error("Field dependencies form a cycle: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
    #[error("Field '{name}' is provided by two different sources ({first} and {second})")]
    AmbiguousField {
        name: String,
        first: String,
        second: String,
    },
    #[error("Field '{field}' has an invalid dependency: {reason}")]
    InvalidDependency { field: String, reason: String },
    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),
    #[error("Cannot assign rank {rank} out of {worker_count} workers")]
    InvalidPartition { rank: usize, worker_count: usize },
    #[error("'{0}' is not a valid date/time format pattern")]
    InvalidPattern(String),
    #[error("At least one direct field is needed to define the output grid")]
    NoReferenceField,
    #[error("Error in the settings: {0}")]
    Settings(String),
}

impl ConfigError {
    pub fn invalid_dependency<F: ToString, R: ToString>(field: F, reason: R) -> Self {
        Self::InvalidDependency {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that abort processing of one timestamp. Other timestamps in the run
/// are not affected.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("Required source file {} does not exist", .0.display())]
    MissingSourceFile(PathBuf),
    #[error("Error reading variable '{varname}' from {}", .path.display())]
    Read { path: PathBuf, varname: String },
    #[error("Error writing output file {}", .0.display())]
    Write(PathBuf),
    #[error("Error interpolating field '{0}' to pressure levels")]
    Interpolation(String),
    #[error("Error deriving field '{0}'")]
    Derivation(String),
    #[error("Error converting fields to the intermediate format for {0}")]
    Conversion(NaiveDateTime),
    #[error("Dimension '{dim}' has length {expected} in the output but {actual} in variable '{varname}'")]
    DimensionMismatch {
        dim: String,
        expected: usize,
        actual: usize,
        varname: String,
    },
    #[error("{0}")]
    Context(String),
}

impl StepError {
    pub fn read_error<P: Into<PathBuf>, S: ToString>(path: P, varname: S) -> Self {
        Self::Read {
            path: path.into(),
            varname: varname.to_string(),
        }
    }

    pub fn context<S: ToString>(msg: S) -> Self {
        Self::Context(msg.to_string())
    }
}

/// Errors raised by a [`crate::io::SourceReader`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("File {} does not exist", .0.display())]
    MissingFile(PathBuf),
    #[error("File {} does not contain variable '{1}'", .0.display())]
    MissingVariable(PathBuf, String),
    #[error("Variable '{0}' has a data type that cannot be read generically ({1})")]
    UnsupportedType(String, String),
    #[error("{0}")]
    Custom(String),
}

impl ReadError {
    pub fn custom<S: ToString>(msg: S) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// Errors raised by a [`crate::io::ContainerWriter`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Error creating file {}", .0.display())]
    Create(PathBuf),
    #[error("Error writing {what} to {}", .path.display())]
    Put { path: PathBuf, what: String },
    #[error("Error renaming {} to {}", .from.display(), .to.display())]
    Rename { from: PathBuf, to: PathBuf },
    #[error("Error removing {}", .0.display())]
    Remove(PathBuf),
}

impl WriteError {
    pub fn put<P: Into<PathBuf>, S: ToString>(path: P, what: S) -> Self {
        Self::Put {
            path: path.into(),
            what: what.to_string(),
        }
    }
}

/// Errors raised while computing a derived field.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("Dependency '{0}' was not provided to the derivation")]
    MissingInput(String),
    #[error("Derivation returned malformed output: {0}")]
    MalformedOutput(String),
    #[error("Error reading input '{0}' for derivation")]
    Read(String),
    #[error("Derivation inputs are inconsistent: {0}")]
    InconsistentInputs(String),
    #[error("External utility failed: {0}")]
    External(String),
}
