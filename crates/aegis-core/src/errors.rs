use std::time::Duration;

/// Failures talking to a reasoning service. Fatal errors end the session,
/// retryable ones go back through the retry policy.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Operational
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
                | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::ContextWindowExceeded(_) | Self::InvalidRequest(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded(_) => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Map a non-success HTTP status from the chat-completions endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            413 => Self::ContextWindowExceeded(body),
            400 if body.contains("maximum context length") => Self::ContextWindowExceeded(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            408 => Self::Timeout(Duration::ZERO),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_from_an_openai_compatible_server() {
        let cases = [
            (401, "invalid api key", "authentication_failed"),
            (400, "This model's maximum context length is 32768 tokens", "context_window_exceeded"),
            (400, "unknown field", "invalid_request"),
            (404, "model not found", "invalid_request"),
            (408, "", "timeout"),
            (429, "slow down", "rate_limited"),
            (503, "warming up", "provider_overloaded"),
            (502, "bad gateway", "server_error"),
            (302, "moved", "invalid_request"),
        ];
        for (status, body, kind) in cases {
            assert_eq!(GatewayError::from_status(status, body.into()).error_kind(), kind, "status {status}");
        }
    }

    #[test]
    fn fatal_and_retryable_are_disjoint() {
        let all = [
            GatewayError::AuthenticationFailed("k".into()),
            GatewayError::ContextWindowExceeded("long".into()),
            GatewayError::InvalidRequest("bad".into()),
            GatewayError::RateLimited { retry_after: None },
            GatewayError::ServerError { status: 500, body: String::new() },
            GatewayError::ProviderOverloaded,
            GatewayError::NetworkError("reset".into()),
            GatewayError::Timeout(Duration::from_secs(600)),
            GatewayError::MalformedResponse("no choices".into()),
        ];
        let fatal = all.iter().filter(|e| e.is_fatal()).count();
        let retryable = all.iter().filter(|e| e.is_retryable()).count();
        assert_eq!((fatal, retryable), (3, 5));
        assert!(all.iter().all(|e| !(e.is_fatal() && e.is_retryable())));
    }

    #[test]
    fn retry_after_is_honoured_only_for_rate_limits() {
        let limited = GatewayError::RateLimited { retry_after: Some(Duration::from_secs(5)) };
        assert_eq!(limited.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(GatewayError::Timeout(Duration::ZERO).suggested_delay(), None);
    }
}
