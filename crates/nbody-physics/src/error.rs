//! Error taxonomy shared by every crate of the simulator

use std::path::PathBuf;

use thiserror::Error;

/// Coarse failure category, reported alongside a numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A fixed-capacity resource (tree cells, buffers) is too small
    ResourceExhaustion,
    /// An accelerator call failed
    DeviceOperationFailure,
    /// Input rejected before any buffer was created
    ConfigurationError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{resource} exhausted: {required} required, capacity {capacity}")]
    ResourceExhaustion {
        resource: &'static str,
        required: u64,
        capacity: u64,
    },

    #[error("device operation `{operation}` failed: {message}")]
    DeviceOperation {
        operation: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("particle file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("particle file line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl Error {
    pub fn device(operation: &'static str, message: impl ToString) -> Self {
        Self::DeviceOperation {
            operation,
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ResourceExhaustion { .. } => ErrorKind::ResourceExhaustion,
            Error::DeviceOperation { .. } => ErrorKind::DeviceOperationFailure,
            Error::Configuration(_) | Error::Io { .. } | Error::Parse { .. } => {
                ErrorKind::ConfigurationError
            }
        }
    }

    /// Stable numeric code for the failure category
    pub fn code(&self) -> u32 {
        match self.kind() {
            ErrorKind::ResourceExhaustion => 1,
            ErrorKind::DeviceOperationFailure => 2,
            ErrorKind::ConfigurationError => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_kind() {
        let exhausted = Error::ResourceExhaustion {
            resource: "tree cells",
            required: 10,
            capacity: 4,
        };
        assert_eq!(exhausted.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(exhausted.code(), 1);
        assert_eq!(
            exhausted.to_string(),
            "tree cells exhausted: 10 required, capacity 4"
        );

        let device = Error::device("queue.submit", "lost");
        assert_eq!(device.code(), 2);
        assert_eq!(
            device.to_string(),
            "device operation `queue.submit` failed: lost"
        );

        let parse = Error::Parse {
            line: 3,
            message: "expected 5 fields".into(),
        };
        assert_eq!(parse.kind(), ErrorKind::ConfigurationError);
        assert_eq!(parse.code(), 3);
    }
}
