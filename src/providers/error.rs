use std::fmt;

use crate::utils::truncate_str;

/// Classified provider error, so logs say *why* a completion failed.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403: bad API key or permissions.
    Auth,
    /// 402: billing/quota exhausted.
    Billing,
    /// 429.
    RateLimit,
    /// 404 or "model not found".
    NotFound,
    /// 408, or the client-side timeout fired.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504.
    ServerError,
    /// 2xx with a body we could not use.
    Malformed,
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            402 => ProviderErrorKind::Billing,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate_str(body, 300),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn malformed(message: &str) -> Self {
        Self {
            kind: ProviderErrorKind::Malformed,
            status: None,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "Provider error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "Provider error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(ProviderError::from_status(401, "").kind, ProviderErrorKind::Auth);
        assert_eq!(
            ProviderError::from_status(429, "slow down").kind,
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::from_status(503, "").kind,
            ProviderErrorKind::ServerError
        );
        assert_eq!(ProviderError::from_status(418, "").kind, ProviderErrorKind::Unknown);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = ProviderError::from_status(500, &body);
        assert!(err.message.chars().count() <= 300);
        assert!(err.to_string().starts_with("Provider error (500"));
    }
}
