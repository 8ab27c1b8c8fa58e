//! Errors raised at the generative model boundary.
//!
//! Whether a failure is worth retrying is decided here, where the raw
//! transport error is wrapped, not by inspecting messages downstream.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AiError {
    /// Upstream rejected the call for exceeding its request rate.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Upstream quota for the current window is used up.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    /// The response arrived but could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AiError {
    /// Classifies a non-success HTTP response.
    ///
    /// 429 and bodies reporting `RESOURCE_EXHAUSTED` are quota pressure; other
    /// statuses are plain API errors.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status_code == 429 {
            Self::RateLimited(message)
        } else if message.contains("RESOURCE_EXHAUSTED") {
            Self::QuotaExhausted(message)
        } else {
            Self::Api {
                status_code,
                message,
            }
        }
    }

    /// Returns true only for quota pressure.
    ///
    /// Network errors, timeouts and malformed responses are not retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::QuotaExhausted(_))
    }
}
