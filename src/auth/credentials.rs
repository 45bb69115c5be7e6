use std::sync::{PoisonError, RwLock};

use crate::config::AuthConfig;

/// Source of the bearer token used for both the stream and the REST API.
///
/// Token issuance happens elsewhere; implementations only hand out whatever
/// the login flow stored.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// In-process credential store.
///
/// The token can be swapped at runtime so a login or logout takes effect on
/// the next connection attempt without rebuilding the manager.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.token.clone())
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *guard = if token.is_empty() { None } else { Some(token) };
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialStore for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
