// src/errors.rs
use thiserror::Error;

use crate::normalizer;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Unexpected response structure: {0}")]
    UnexpectedResponse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("No pending payment to resume")]
    NoPendingPayment,

    #[error("Transaction '{0}' is already being verified")]
    AlreadyWatching(String),
}

impl FlowError {
    /// Error codes carried in a rejected API body, e.g. `SUBSCRIPTION_REQUIRED`.
    pub fn api_codes(&self) -> Vec<String> {
        match self {
            FlowError::ApiError { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .map(|value| normalizer::error_codes(&value))
                .unwrap_or_else(|_| {
                    // plain-text bodies sometimes carry the bare code
                    let trimmed = body.trim();
                    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                        vec![trimmed.to_string()]
                    } else {
                        Vec::new()
                    }
                }),
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_codes_from_validation_errors() {
        let err = FlowError::ApiError {
            status: 403,
            body: r#"{"validationErrors":"SUBSCRIPTION_REQUIRED"}"#.to_string(),
        };
        assert_eq!(err.api_codes(), vec!["SUBSCRIPTION_REQUIRED".to_string()]);
    }

    #[test]
    fn test_api_codes_plain_text_body() {
        let err = FlowError::ApiError { status: 402, body: "SUBSCRIPTION_REQUIRED\n".to_string() };
        assert_eq!(err.api_codes(), vec!["SUBSCRIPTION_REQUIRED".to_string()]);

        let err = FlowError::ApiError { status: 500, body: "Internal Server Error".to_string() };
        assert!(err.api_codes().is_empty());
    }

    #[test]
    fn test_non_api_errors_have_no_codes() {
        assert!(FlowError::NoPendingPayment.api_codes().is_empty());
    }
}
