use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("User function failed: {0}")]
    UserFunction(String),

    #[error("Pane corrupted for window {window}: {reason}")]
    PaneCorrupted { window: String, reason: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),
}

impl StreamError {
    /// Shorthand for failures raised inside seed, fold, trigger or combiner code.
    pub fn user(message: impl Into<String>) -> Self {
        StreamError::UserFunction(message.into())
    }

    /// True for errors that leave persisted state in an unknown condition.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            StreamError::Persistence(_)
                | StreamError::Serialization(_)
                | StreamError::PaneCorrupted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::PaneCorrupted {
            window: "[0, 10)".to_string(),
            reason: "write rejected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Pane corrupted for window [0, 10): write rejected"
        );
        assert!(err.is_persistence());
        assert!(!StreamError::user("boom").is_persistence());
    }

    #[test]
    fn test_serialization_conversion() {
        let parse: std::result::Result<u64, _> = serde_json::from_str("not json");
        let err: StreamError = parse.unwrap_err().into();
        assert!(matches!(err, StreamError::Serialization(_)));
    }
}
