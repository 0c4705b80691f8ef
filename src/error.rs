use std::time::Duration;

use crate::watchdog::IdlePhase;

/// Shown when the model could not be reached or is throttled.
pub const MODEL_UNAVAILABLE_MESSAGE: &str =
    "The selected model is unavailable or busy right now. Please try again in a moment.";
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

const MODEL_NOT_AVAILABLE_MARKER: &str = "model identifier is invalid";

/// Failures surfaced by the stream client and the one-shot operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("no stream event within {}ms ({phase})", .budget.as_millis())]
    IdleTimeout { phase: IdlePhase, budget: Duration },
    #[error("{0}")]
    Remote(String),
    #[error("{0} generation failed")]
    MissingResult(&'static str),
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("a request is already in flight")]
    Busy,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_idle_timeout(&self) -> bool {
        matches!(self, ClientError::IdleTimeout { .. })
    }

    pub fn is_model_unavailable(&self) -> bool {
        self.is_idle_timeout() || self.to_string().contains(MODEL_NOT_AVAILABLE_MARKER)
    }

    /// Fixed text suitable for the transcript.
    pub fn user_message(&self) -> &'static str {
        if self.is_model_unavailable() {
            MODEL_UNAVAILABLE_MESSAGE
        } else {
            GENERIC_ERROR_MESSAGE
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeouts_are_reported_as_model_unavailable() {
        let err = ClientError::IdleTimeout {
            phase: IdlePhase::FirstEvent,
            budget: Duration::from_millis(100),
        };
        assert!(err.is_idle_timeout());
        assert_eq!(err.user_message(), MODEL_UNAVAILABLE_MESSAGE);
        assert!(err.to_string().contains("100ms"));
    }

    #[test]
    fn invalid_model_identifier_is_recognised() {
        let err = ClientError::Remote(
            "ValidationException: The provided model identifier is invalid.".to_string(),
        );
        assert!(!err.is_idle_timeout());
        assert_eq!(err.user_message(), MODEL_UNAVAILABLE_MESSAGE);
    }

    #[test]
    fn other_failures_get_the_generic_message() {
        let err = ClientError::MissingResult("PDF");
        assert_eq!(err.to_string(), "PDF generation failed");
        assert_eq!(err.user_message(), GENERIC_ERROR_MESSAGE);
    }
}
