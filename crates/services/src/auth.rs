//! Token validation contract and a reference in-memory implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Identity attached to a validated token.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub user_id: i64,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Validates bearer tokens presented on WebSocket upgrade.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Resolve a token to its claims. `InvalidCredentials` for unknown or
    /// expired tokens.
    async fn validate_token(&self, token: &str) -> Result<AuthClaims>;
}

/// In-memory auth service: tokens are issued explicitly, typically by test
/// setup or the monolith's dev login.
pub struct MockAuthService {
    tokens: RwLock<HashMap<String, AuthClaims>>,
}

impl MockAuthService {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a token for a user, valid for 24 hours.
    pub fn issue_token(&self, token: &str, user_id: i64, username: &str) {
        let claims = AuthClaims {
            user_id,
            username: username.to_string(),
            expires_at: Utc::now() + Duration::hours(24),
        };
        self.tokens
            .write()
            .expect("auth token map poisoned")
            .insert(token.to_string(), claims);
    }

    /// Drop a token, e.g. on logout.
    pub fn revoke_token(&self, token: &str) {
        self.tokens
            .write()
            .expect("auth token map poisoned")
            .remove(token);
    }
}

impl Default for MockAuthService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for MockAuthService {
    async fn validate_token(&self, token: &str) -> Result<AuthClaims> {
        let claims = {
            let tokens = self.tokens.read().expect("auth token map poisoned");
            tokens.get(token).cloned()
        };
        match claims {
            Some(claims) if claims.expires_at > Utc::now() => Ok(claims),
            Some(_) => Err(Error::InvalidCredentials),
            None => Err(Error::InvalidCredentials),
        }
    }
}
