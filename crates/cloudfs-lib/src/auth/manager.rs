//! Resolves a live token for a named connection and binds it to the
//! provider's adapter.
//!
//! Resolution order: in-memory cache, then the connection's save policy
//! (config field or secret store), then acquisition (browser flow or manual
//! prompt). A resolved token is cached for the rest of the process run.
//!
//! Adapters are shared per provider. Binding a connection installs its
//! token on the shared adapter and, when the adapter last served another
//! connection, clears the path ids it learnt there. Two connections of one
//! provider must therefore not be driven concurrently: the later bind wins
//! the token for both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::authorizer::{Authorizer, InteractiveAuthorizer};
use super::prompt::{DialoguerPrompt, TokenPrompt, TOKEN_PROMPT};
use super::secret_store::SecretStore;
use crate::cloud::registry::ServiceRegistry;
use crate::cloud::ServiceClient;
use crate::config::{ConfigStore, Connection, SaveType, Settings, TokenMethod};
use crate::errors::{CloudError, Result};

/// Token cache entry for one connection; its lock serializes acquisition.
type CachedToken = Arc<Mutex<Option<String>>>;

/// Owns the token cache and the collaborators used to fill it.
pub struct ConnectionManager {
    store: Arc<ConfigStore>,
    registry: Arc<ServiceRegistry>,
    secrets: Arc<dyn SecretStore>,
    authorizer: Arc<dyn Authorizer>,
    prompt: Arc<dyn TokenPrompt>,
    tokens: Mutex<HashMap<String, CachedToken>>,
    /// Provider key to the connection whose token the adapter holds.
    bound: Mutex<HashMap<&'static str, String>>,
}

impl ConnectionManager {
    /// Manager using the system browser and a terminal prompt.
    pub fn new(
        store: Arc<ConfigStore>,
        registry: Arc<ServiceRegistry>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            store,
            registry,
            secrets,
            authorizer: Arc::new(InteractiveAuthorizer::new()),
            prompt: Arc::new(DialoguerPrompt),
            tokens: Mutex::new(HashMap::new()),
            bound: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn TokenPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The adapter for connection `name`, with its token bound.
    pub async fn client_for(&self, name: &str) -> Result<Arc<dyn ServiceClient>> {
        let conn = self.store.get(name).await?;
        let client = self.registry.get(&conn.service).await?;
        if !client.requires_token() {
            return Ok(client);
        }

        let token = self.resolve(&conn, client.as_ref()).await?;
        self.bind(&conn.name, client.as_ref()).await;
        client.set_oauth_token(&token).await?;
        Ok(client)
    }

    /// Drop the cached token for `name`, e.g. after removing the connection.
    pub async fn forget(&self, name: &str) {
        self.tokens.lock().await.remove(name);
        self.bound.lock().await.retain(|_, conn| conn != name);
    }

    /// Move a cached token to the connection's new name.
    pub async fn rename(&self, old: &str, new: &str) {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.remove(old) {
            tokens.insert(new.to_string(), token);
        }
        drop(tokens);
        for conn in self.bound.lock().await.values_mut() {
            if conn == old {
                *conn = new.to_string();
            }
        }
    }

    /// Resolve a token for `conn` without binding it.
    ///
    /// Each connection has its own cache lock, held for the whole
    /// resolution: concurrent callers for one connection trigger a single
    /// acquisition, while other connections resolve independently.
    pub async fn resolve(&self, conn: &Connection, client: &dyn ServiceClient) -> Result<String> {
        let entry = self.entry(&conn.name).await;
        let mut cached = entry.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = match conn.save_type {
            SaveType::DontSave => self.acquire(conn, client).await?,
            SaveType::Config => match conn.stored_token() {
                Some(token) => token.to_string(),
                None => {
                    let token = self.acquire(conn, client).await?;
                    let stored = token.clone();
                    self.store
                        .update(&conn.name, move |c| c.oauth_token = Some(stored))
                        .await?;
                    token
                }
            },
            SaveType::PasswordManager => match self.load_secret(&conn.name) {
                Some(token) => token,
                None => {
                    let token = self.acquire(conn, client).await?;
                    self.secrets.save(&conn.name, &token).map_err(|e| {
                        CloudError::Auth(format!("cannot save token for {}: {e}", conn.name))
                    })?;
                    token
                }
            },
        };

        tracing::debug!(connection = %conn.name, save_type = %conn.save_type, "Token resolved");
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn entry(&self, name: &str) -> CachedToken {
        self.tokens
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Record that `name` now owns the shared adapter, resetting state the
    /// adapter learnt for a different connection.
    async fn bind(&self, name: &str, client: &dyn ServiceClient) {
        let mut bound = self.bound.lock().await;
        let previous = bound.insert(client.key(), name.to_string());
        if let Some(previous) = previous.filter(|p| p != name) {
            tracing::debug!(
                service = client.key(),
                from = %previous,
                to = name,
                "Adapter switched connection"
            );
            client.reset_session().await;
        }
    }

    fn load_secret(&self, name: &str) -> Option<String> {
        match self.secrets.load(name) {
            Ok(found) => found.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(connection = name, "Secret store load failed: {}", e);
                None
            }
        }
    }

    /// Obtain a fresh token from the user. Never returns an empty token.
    async fn acquire(&self, conn: &Connection, client: &dyn ServiceClient) -> Result<String> {
        let token = match conn.get_token_method {
            TokenMethod::Oauth => {
                apply_oauth_overrides(conn, client);
                let url = client.auth_page_url()?;
                let timeout = Duration::from_secs(
                    conn.auth_timeout
                        .unwrap_or(Settings::get().default_auth_timeout_secs),
                );
                tracing::info!(
                    connection = %conn.name,
                    service = client.key(),
                    "Starting browser authorization"
                );
                self.authorizer.acquire(&url, client.port(), timeout).await?
            }
            TokenMethod::Manual => self
                .prompt
                .prompt_text(TOKEN_PROMPT, TOKEN_PROMPT)?
                .unwrap_or_default(),
        };

        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(CloudError::Auth(format!(
                "no token obtained for connection {}",
                conn.name
            )));
        }
        Ok(token)
    }
}

/// Adapters are shared per provider, so every connection sets its own
/// client id and port (or restores the defaults) before authorizing.
fn apply_oauth_overrides(conn: &Connection, client: &dyn ServiceClient) {
    let Some(app) = client.oauth() else {
        return;
    };
    match conn.client_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => app.set_client_id(id),
        None => app.reset_client_id(),
    }
    app.set_port(conn.port.unwrap_or(Settings::get().default_port));
}
