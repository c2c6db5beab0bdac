use thiserror::Error;

use crate::storage::ImageError;

/// Failure classification surfaced by the command layer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("model unavailable: {0:#}")]
    ModelUnavailable(#[source] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::Storage(_) => "storage_failure",
            Self::ModelUnavailable(_) => "model_unavailable",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MalformedInput(_))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

impl From<ImageError> for EngineError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Malformed(message) => Self::MalformedInput(message),
            ImageError::Io(err) => Self::Storage(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::malformed("x").code(), "malformed_input");
        assert_eq!(EngineError::Storage(anyhow!("disk")).code(), "storage_failure");
        assert_eq!(
            EngineError::ModelUnavailable(anyhow!("down")).code(),
            "model_unavailable"
        );
    }

    #[test]
    fn only_malformed_input_is_a_client_error() {
        assert!(EngineError::malformed("bad lat").is_client_error());
        assert!(!EngineError::from(anyhow!("io")).is_client_error());
        assert!(EngineError::from(ImageError::Malformed("bad png".into())).is_client_error());
    }

    #[test]
    fn storage_message_keeps_context_chain() {
        let err = EngineError::from(anyhow!("disk full").context("Failed to append entry"));
        assert_eq!(
            err.to_string(),
            "storage failure: Failed to append entry: disk full"
        );
    }
}
