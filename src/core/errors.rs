//! Error taxonomy shared by the validator, resolver, adapters and engine.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which validation phase produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// The document does not match the descriptor schema.
    Schema,
    /// The document is well-formed but breaks a cross-field constraint.
    Semantic,
}

/// A single located validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
}

impl ValidationError {
    pub fn schema(file: &str, location: Option<(usize, usize)>, message: impl Into<String>) -> Self {
        Self::new(ValidationKind::Schema, file, location, message)
    }

    pub fn semantic(
        file: &str,
        location: Option<(usize, usize)>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ValidationKind::Semantic, file, location, message)
    }

    fn new(
        kind: ValidationKind,
        file: &str,
        location: Option<(usize, usize)>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            file: file.to_string(),
            line: location.map(|(line, _)| line),
            column: location.map(|(_, column)| column),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{}:{}:{}: {}", self.file, line, column, self.message)
            }
            (Some(line), None) => write!(f, "{}:{}: {}", self.file, line, self.message),
            _ => write!(f, "{}: {}", self.file, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Descriptor is not valid ({} issue(s))", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Mounting {remote} on {} failed: {reason}", .mount_point.display())]
    Mount {
        remote: String,
        mount_point: PathBuf,
        reason: String,
    },

    #[error("Unmounting {} failed: {reason}", .mount_point.display())]
    Unmount { mount_point: PathBuf, reason: String },

    #[error("{backend} backup of source '{source_key}' failed with {}", exit_label(.code))]
    CommandExecution {
        backend: String,
        source_key: String,
        code: Option<i32>,
    },

    #[error("Could not start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted, stopping")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_diagnostic_renders_file_line_column() {
        let err = ValidationError::schema("b.yml", Some((4, 7)), "unexpected key 'metod'");
        assert_eq!(err.to_string(), "b.yml:4:7: unexpected key 'metod'");
    }

    #[test]
    fn unlocated_diagnostic_renders_file_only() {
        let err = ValidationError::semantic("b.yml", None, "no sources");
        assert_eq!(err.to_string(), "b.yml: no sources");
        assert_eq!(err.kind, ValidationKind::Semantic);
    }

    #[test]
    fn execution_error_names_backend_source_and_code() {
        let err = BackupError::CommandExecution {
            backend: "rsync".into(),
            source_key: "etc".into(),
            code: Some(23),
        };
        assert_eq!(err.to_string(), "rsync backup of source 'etc' failed with exit code 23");
    }
}
