use thiserror::Error;

/// Failures the feed core can observe. Every variant is recoverable by
/// dispatching another action; none of them end the session.
///
/// The payloads are plain strings so errors can travel inside actions,
/// which are cloned and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// No token, a blank token, or the service rejected the token.
    #[error("authentication required")]
    AuthRequired,
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("vote failed: {0}")]
    VoteFailed(String),
}

impl FeedError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FeedError::AuthRequired)
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Decode(err.to_string())
        } else if err.status().map_or(false, |s| s.as_u16() == 401) {
            FeedError::AuthRequired
        } else {
            FeedError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::Network(format!("invalid url: {err}"))
    }
}

pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_are_decode_failures() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(FeedError::from(err), FeedError::Decode(_)));
    }

    #[test]
    fn only_auth_required_is_auth() {
        assert!(FeedError::AuthRequired.is_auth());
        assert!(!FeedError::Network("timeout".into()).is_auth());
    }
}
