//! Error types for the interception layer.

/// Errors raised while intercepting, resolving, or asserting on requests.
///
/// None of these are retried or recovered internally. A strict-mode miss or
/// a failed assertion is meant to end the current test.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// Strict mode is on and no rule matched the outbound URL.
    #[error("Unexpected HTTP request to: {url}")]
    UnmatchedStrictRequest {
        /// The URL that had no matching rule.
        url: String,
    },

    /// An `assert_*` / `check_*` call over the request log failed.
    #[error("{message}")]
    AssertionFailed {
        /// Human-readable failure naming the pattern and counts.
        message: String,
    },

    /// A responder produced something that cannot become a response.
    #[error("Malformed response for {url}: {reason}")]
    MalformedRuleResponse {
        /// URL of the request being answered.
        url: String,
        /// What was wrong with the produced response.
        reason: String,
    },

    /// A URL pattern could not be compiled.
    #[error("Invalid URL pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A response body was expected to be JSON and was not.
    #[error("Response is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    /// The real transport failed on a pass-through request.
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl InterceptError {
    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        InterceptError::AssertionFailed {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(url: &str, reason: impl std::fmt::Display) -> Self {
        InterceptError::MalformedRuleResponse {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_message_embeds_url() {
        let err = InterceptError::UnmatchedStrictRequest {
            url: "https://unmocked.test/x".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected HTTP request to: https://unmocked.test/x"
        );
    }

    #[test]
    fn test_transport_from_anyhow() {
        let err: InterceptError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, InterceptError::Transport(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
