use thiserror::Error;

/// Failure of one remote call, classified for the retry loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Request or response timed out
    #[error("remote call timed out: {0}")]
    Timeout(String),
    /// TLS handshake failed before the request was delivered
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),
    /// Connection dropped mid-request
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    /// Transient "service unavailable" style response
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// Request rejected as invalid
    #[error("validation failed: {0}")]
    Validation(String),
    /// Credentials missing or refused
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote call failed: {0}")]
    Other(String),
}

impl RemoteError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Tls(_)
                | Self::Connect(_)
                | Self::ConnectionReset(_)
                | Self::Unavailable(_)
        )
    }

    /// Whether the server may have applied the write despite the error
    pub fn may_have_applied(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionReset(_) | Self::Unavailable(_)
        )
    }

    /// Classify an HTTP status code
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = truncate_body(body);
        match status {
            400 | 409 | 422 => Self::Validation(message),
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            408 | 504 => Self::Timeout(message),
            429 | 502 | 503 => Self::Unavailable(message),
            _ => Self::Other(format!("status {}: {}", status, message)),
        }
    }

    /// Classify a transport-level failure
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let message = error_chain(err);
        if err.is_timeout() {
            Self::Timeout(message)
        } else if looks_like_tls(&message) {
            Self::Tls(message)
        } else if err.is_connect() {
            Self::Connect(message)
        } else if err.is_request() || err.is_body() {
            Self::ConnectionReset(message)
        } else {
            Self::Other(message)
        }
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn looks_like_tls(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("tls") || lower.contains("handshake") || lower.contains("certificate")
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > 300 {
        format!("{}...", body.chars().take(300).collect::<String>())
    } else {
        body.to_string()
    }
}
