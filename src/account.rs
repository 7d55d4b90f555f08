//! Customer session: token storage, login, registration and logout.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::api::{ApiClient, RegisterRequest};
use crate::domain::events::{AuthEvent, EventBus, Subscription};
use crate::storage::KeyValueStorage;
use crate::{Result, StorefrontError, TokenPair, User};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    events: EventBus<AuthEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage, events: EventBus::new() }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn access_token(&self) -> Option<String> {
        match self.storage.get(ACCESS_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "could not read access token");
                None
            }
        }
    }

    /// Presence check only; the backend decides whether the token is still valid.
    pub fn is_authenticated(&self) -> bool { self.access_token().is_some() }

    pub fn store_tokens(&self, username: &str, tokens: &TokenPair) -> Result<()> {
        self.storage.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        self.storage.set(REFRESH_TOKEN_KEY, &tokens.refresh)?;
        self.events.emit(&AuthEvent::LoggedIn { username: username.to_string() });
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove(ACCESS_TOKEN_KEY)?;
        self.storage.remove(REFRESH_TOKEN_KEY)?;
        self.events.emit(&AuthEvent::LoggedOut);
        Ok(())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("authenticated", &self.is_authenticated()).finish()
    }
}

/// Account flows on top of the API client and session.
#[derive(Debug, Clone)]
pub struct AccountService {
    api: ApiClient,
    session: Arc<SessionStore>,
}

impl AccountService {
    pub fn new(api: ApiClient, session: Arc<SessionStore>) -> Self {
        let api = api.with_session(Arc::clone(&session));
        Self { api, session }
    }

    /// Signs in, then attaches any guest orders placed with the same e-mail.
    /// A failed claim never fails the login.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let tokens = self.api.obtain_token(username, password).await.map_err(|e| match e {
            StorefrontError::Api { .. } => StorefrontError::InvalidCredentials,
            other => other,
        })?;
        self.session.store_tokens(username, &tokens)?;
        info!("signed in");

        match self.api.claim_guest_orders().await {
            Ok(result) => info!(claimed = result.claimed, "guest orders claimed"),
            Err(e) => warn!(error = %e, "could not claim guest orders"),
        }
        Ok(tokens)
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let request = RegisterRequest { username: username.to_string(), email: email.to_string(), password: password.to_string() };
        let user = self.api.register(&request).await?;
        info!(user_id = user.id, "account created");
        self.login(username, password).await?;
        Ok(user)
    }

    pub fn logout(&self) -> Result<()> {
        self.session.clear()?;
        info!("signed out");
        Ok(())
    }

    pub async fn me(&self) -> Result<User> { self.api.me().await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Mutex;

    #[test]
    fn test_tokens_and_events() {
        let session = SessionStore::new(Arc::new(MemoryStorage::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let _sub = session.subscribe(move |e| log.lock().unwrap().push(e.clone()));

        assert!(!session.is_authenticated());
        session.store_tokens("ana", &TokenPair { access: "a1".into(), refresh: "r1".into() }).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.access_token().as_deref(), Some("a1"));

        session.clear().unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![AuthEvent::LoggedIn { username: "ana".into() }, AuthEvent::LoggedOut]
        );
    }

    #[test]
    fn test_empty_token_is_not_a_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(ACCESS_TOKEN_KEY, "").unwrap();
        let session = SessionStore::new(storage);
        assert!(!session.is_authenticated());
    }
}
