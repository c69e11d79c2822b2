//! # Auth Collaborator
//!
//! The gateway treats credentials as opaque: it asks an [`AuthProvider`] for a
//! token per [`AuthType`] and, after a 401, for exactly one refreshed token.

use crate::registry::AuthType;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug};
use thiserror::Error;

/// Opaque credential; the secret never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("no credentials available for {0} auth")]
    NoCredentials(AuthType),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

#[async_trait]
pub trait AuthProvider: Send + Sync + Debug {
    async fn get_token(&self, auth_type: AuthType) -> Option<Token>;

    async fn refresh_token(&self, auth_type: AuthType) -> Result<Token, AuthError>;
}

/// Holds current tokens in memory, with an optional queue of tokens handed out
/// on refresh
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: Mutex<HashMap<AuthType, Token>>,
    refreshed: Mutex<HashMap<AuthType, VecDeque<Token>>>,
    refresh_calls: Mutex<usize>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, auth_type: AuthType, token: impl Into<String>) -> Self {
        self.set_token(auth_type, token);
        self
    }

    pub fn with_refresh(self, auth_type: AuthType, token: impl Into<String>) -> Self {
        self.refreshed
            .lock()
            .entry(auth_type)
            .or_default()
            .push_back(Token::new(token));
        self
    }

    pub fn set_token(&self, auth_type: AuthType, token: impl Into<String>) {
        self.tokens.lock().insert(auth_type, Token::new(token));
    }

    pub fn clear(&self, auth_type: AuthType) {
        self.tokens.lock().remove(&auth_type);
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_calls.lock()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_token(&self, auth_type: AuthType) -> Option<Token> {
        self.tokens.lock().get(&auth_type).cloned()
    }

    async fn refresh_token(&self, auth_type: AuthType) -> Result<Token, AuthError> {
        *self.refresh_calls.lock() += 1;

        let next = self
            .refreshed
            .lock()
            .get_mut(&auth_type)
            .and_then(VecDeque::pop_front)
            .ok_or(AuthError::NoCredentials(auth_type))?;

        self.tokens.lock().insert(auth_type, next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_replaces_current_token() {
        let provider = StaticTokenProvider::new()
            .with_token(AuthType::Bearer, "stale")
            .with_refresh(AuthType::Bearer, "fresh");

        assert_eq!(
            provider.get_token(AuthType::Bearer).await,
            Some(Token::new("stale"))
        );
        assert_eq!(
            provider.refresh_token(AuthType::Bearer).await.unwrap(),
            Token::new("fresh")
        );
        assert_eq!(
            provider.get_token(AuthType::Bearer).await,
            Some(Token::new("fresh"))
        );
        assert!(provider.refresh_token(AuthType::Bearer).await.is_err());
        assert_eq!(provider.refresh_calls(), 2);
    }

    #[test]
    fn test_token_debug_is_masked() {
        assert_eq!(format!("{:?}", Token::new("secret")), "Token(***)");
    }
}
