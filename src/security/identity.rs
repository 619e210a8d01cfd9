//! Identity validation.
//!
//! Credentials are opaque bearer strings. A validator turns one into an
//! [`Identity`] carrying the identity id, the room (family) it may join, and
//! its permissions. How credentials are issued is out of scope here; the
//! gateway only consumes the result.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Serialize;
use thiserror::Error;

use crate::config::AuthConfig;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub identity_id: String,
    pub room_claim: String,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "*")
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential")]
    Invalid,

    #[error("identity validation unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityValidator: Send + Sync {
    async fn validate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Validator backed by the token table in the configuration.
#[derive(Debug, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        let mut validator = Self::new();
        for token in &config.tokens {
            validator.insert(
                &token.token,
                Identity {
                    identity_id: token.identity_id.clone(),
                    room_claim: token.room.clone(),
                    permissions: token.permissions.clone(),
                },
            );
        }
        validator
    }

    pub fn insert(&mut self, token: &str, identity: Identity) {
        self.tokens.insert(token.to_string(), identity);
    }

    pub fn with_token(mut self, token: &str, identity_id: &str, room: &str) -> Self {
        self.insert(
            token,
            Identity {
                identity_id: identity_id.to_string(),
                room_claim: room.to_string(),
                permissions: Vec::new(),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityValidator for StaticTokenValidator {
    async fn validate(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        self.tokens.get(credential).cloned().ok_or(AuthError::Invalid)
    }
}

/// Pull a bearer credential out of the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn validates_configured_tokens() {
        let config = AuthConfig {
            tokens: vec![TokenConfig {
                token: "t-mom".into(),
                identity_id: "mom".into(),
                room: "family-1".into(),
                permissions: vec!["chat".into()],
            }],
        };
        let validator = StaticTokenValidator::from_config(&config);

        let identity = validator.validate("t-mom").await.unwrap();
        assert_eq!(identity.identity_id, "mom");
        assert_eq!(identity.room_claim, "family-1");
        assert!(identity.has_permission("chat"));
        assert!(!identity.has_permission("admin"));

        assert_eq!(validator.validate("nope").await, Err(AuthError::Invalid));
        assert_eq!(validator.validate("").await, Err(AuthError::Missing));
    }

    #[test]
    fn extracts_bearer_tokens() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
