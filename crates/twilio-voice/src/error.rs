//! Error types for twilio-voice

use thiserror::Error;

/// Errors that can occur while placing or terminating a call.
///
/// None of these are retried: dialing is not idempotent.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Required credentials or URLs are missing
    #[error("Telephony provider is not configured: {0}")]
    NotConfigured(String),

    /// Destination number failed local validation
    #[error("Invalid destination number: {0:?}")]
    InvalidDestination(String),

    /// The provider answered with a non-success status
    #[error("Provider rejected request (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        /// Provider-specific error code, when the body carried one
        code: Option<i64>,
        message: String,
    },

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// 2xx response without the fields we need
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err.to_string())
    }
}
