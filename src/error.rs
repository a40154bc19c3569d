use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelaxError>;

/// Library-level failures.
///
/// Every variant maps onto one of the binary's exit codes via `AppError`.
#[derive(Debug, Error)]
pub enum RelaxError {
    #[error("Invalid spin identification string '{id}': {reason}")]
    Selection { id: String, reason: String },

    #[error("The sequence data does not exist.")]
    NoSequence,

    #[error("Duplicate {kind} '{name}'.")]
    Duplicate { kind: &'static str, name: String },

    #[error("The spin ID '{0}' corresponds to more than one spin.")]
    MultipleSpins(String),

    #[error("Unknown {kind} '{name}'.")]
    Unknown { kind: &'static str, name: String },

    #[error("Length mismatch for {what}: expected {expected}, found {found}.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Optimisation failed: {0}")]
    Optimisation(String),

    #[error("Failed to parse '{path}' line {line}: {message}", path = path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("I/O error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}': {source}", path = path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelaxError {
    pub fn selection(id: &str, reason: impl Into<String>) -> Self {
        Self::Selection {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code used by the binary for this class of failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RelaxError::NoSequence | RelaxError::MissingData(_) => 3,
            RelaxError::Optimisation(_) => 4,
            _ => 2,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<RelaxError> for AppError {
    fn from(err: RelaxError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relax_errors_map_to_exit_codes() {
        let err: AppError = RelaxError::NoSequence.into();
        assert_eq!(err.exit_code(), 3);

        let err: AppError = RelaxError::Optimisation("diverged".into()).into();
        assert_eq!(err.exit_code(), 4);

        let err: AppError = RelaxError::selection("@N@C", "more than one '@'").into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("@N@C"));
    }
}
