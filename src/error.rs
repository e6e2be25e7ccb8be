//! Error taxonomy shared by the generation adapter, the persistence gateway,
//! the auth client and the controller.
//!
//! Every failure that reaches an action boundary (load, add, delete, save) is
//! one of these variants; the controller turns it into a single user-visible
//! message and nothing is retried automatically.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// A credential needed by the feature is missing from the environment
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No active session, or the backend rejected the session token
    #[error("authentication required: {0}")]
    Authentication(String),

    /// The remote service could not be reached
    #[error("could not reach {service}: {message}")]
    Connectivity { service: &'static str, message: String },

    /// The AI output did not match the expected structure
    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    /// The AI service failed the request
    #[error("generation failed: {0}")]
    Generation(String),

    /// The backend rejected a read or write
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Caller supplied data that violates the data model
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another mutation is still in flight
    #[error("another change is still in progress")]
    Busy,

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Classify a reqwest failure for the given collaborator.
    ///
    /// Transport-level failures (connect, timeout, request never sent) become
    /// `Connectivity`; everything else is left to the caller's fallback.
    pub fn from_transport(
        service: &'static str,
        err: &reqwest::Error,
        fallback: impl FnOnce(String) -> AppError,
    ) -> AppError {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AppError::Connectivity {
                service,
                message: err.to_string(),
            }
        } else {
            fallback(err.to_string())
        }
    }

    /// Message shown to the user at the action boundary
    pub fn user_message(&self) -> String {
        match self {
            AppError::Connectivity { service, .. } => format!(
                "Could not reach the {}. Check your connection and try again.",
                service
            ),
            AppError::Configuration(msg) => format!("Not configured: {}", msg),
            AppError::Authentication(_) => "Please sign in to continue.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_user_message_is_actionable() {
        let err = AppError::Connectivity {
            service: "card database",
            message: "connection refused".to_string(),
        };
        let msg = err.user_message();
        assert!(msg.contains("card database"));
        assert!(msg.contains("try again"));
    }

    #[test]
    fn test_authentication_user_message() {
        let err = AppError::Authentication("no session".to_string());
        assert_eq!(err.user_message(), "Please sign in to continue.");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = AppError::Persistence("409 Conflict".to_string());
        assert!(err.to_string().contains("409 Conflict"));

        let err = AppError::MalformedResponse("missing examples".to_string());
        assert!(err.user_message().contains("missing examples"));
    }

    #[tokio::test]
    async fn test_from_transport_connect_failure() {
        // Nothing listens on port 9 (discard) in the test environment
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .expect_err("connection should fail");

        let mapped = AppError::from_transport("card database", &err, AppError::Persistence);
        assert!(matches!(mapped, AppError::Connectivity { .. }));
    }
}
