use thiserror::Error;

/// Errors that can occur while recording or replaying page changes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("A recording is already in progress")]
    Busy,

    #[error("Cannot {operation} while session is {state}")]
    InvalidState { operation: String, state: String },

    #[error("Cannot move to index {index}: log holds {len} records")]
    OutOfRange { index: isize, len: usize },

    #[error("Log is not replayable: {reason}")]
    NotReplayable { reason: String },

    #[error("Transport mismatch: {records} records but {refs} node references")]
    TransportMismatch { records: usize, refs: usize },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Deserialization error: {message}")]
    DeserializationError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Collaborator failed: {reason}")]
    CollaboratorFailed { reason: String },
}

impl RecorderError {
    pub(crate) fn invalid_state(operation: &str, state: impl std::fmt::Display) -> Self {
        RecorderError::InvalidState {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }
}

impl From<serde_json::Error> for RecorderError {
    #[cold]
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            RecorderError::DeserializationError {
                message: err.to_string(),
            }
        } else {
            RecorderError::SerializationError {
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for RecorderError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        RecorderError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for RecorderError {
    #[cold]
    fn from(err: toml::de::Error) -> Self {
        RecorderError::ConfigError {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RecorderError::OutOfRange { index: -1, len: 2 };
        assert_eq!(
            error.to_string(),
            "Cannot move to index -1: log holds 2 records"
        );
        assert_eq!(
            RecorderError::Busy.to_string(),
            "A recording is already in progress"
        );
    }

    #[test]
    fn test_invalid_state_helper() {
        let error = RecorderError::invalid_state("move_to", "Active");
        assert_eq!(error.to_string(), "Cannot move_to while session is Active");
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let converted: RecorderError = json_err.unwrap_err().into();
        match converted {
            RecorderError::DeserializationError { .. } => {}
            _ => panic!("Expected DeserializationError"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let converted: RecorderError = io_err.into();

        match converted {
            RecorderError::IoError { message } => {
                assert!(message.contains("file not found"));
            }
            _ => panic!("Expected IoError"),
        }
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let converted: RecorderError = toml_err.into();
        assert!(matches!(converted, RecorderError::ConfigError { .. }));
    }
}
