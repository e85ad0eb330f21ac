use std::env;
use std::sync::Arc;

use parking_lot::RwLock;

/// Supplies the bearer token for authenticated calls. Acquiring and
/// refreshing tokens belongs to the host; the feed only asks for the
/// current one right before each request.
pub trait CredentialProvider: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

/// Returns the provider's token only when it is present and not blank.
pub fn usable_token(provider: &dyn CredentialProvider) -> Option<String> {
    provider
        .current_token()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticToken {
    fn current_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token slot the host session layer rewrites after re-authenticating.
#[derive(Debug, Default)]
pub struct SharedToken {
    token: RwLock<Option<String>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            token: RwLock::new(token),
        })
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl CredentialProvider for SharedToken {
    fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvToken {
    fn current_token(&self) -> Option<String> {
        env::var(&self.var).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_are_not_usable() {
        assert_eq!(usable_token(&StaticToken::new("   ")), None);
        assert_eq!(usable_token(&StaticToken::none()), None);
        assert_eq!(
            usable_token(&StaticToken::new(" abc ")),
            Some("abc".to_string())
        );
    }

    #[test]
    fn shared_token_can_be_swapped() {
        let shared = SharedToken::new(None);
        assert_eq!(shared.current_token(), None);
        shared.set("fresh");
        assert_eq!(shared.current_token().as_deref(), Some("fresh"));
        shared.clear();
        assert_eq!(shared.current_token(), None);
    }

    #[test]
    fn env_token_reads_variable() {
        env::set_var("ROCKETFEED_TEST_TOKEN_SESSION", "from-env");
        let provider = EnvToken::new("ROCKETFEED_TEST_TOKEN_SESSION");
        assert_eq!(provider.current_token().as_deref(), Some("from-env"));
        env::remove_var("ROCKETFEED_TEST_TOKEN_SESSION");
        assert_eq!(provider.current_token(), None);
    }
}
