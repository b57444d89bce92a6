use serde::{Deserialize, Serialize};

/// How a connection obtains its token when none is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMethod {
    /// Browser-based implicit-grant flow.
    #[default]
    Oauth,
    /// The user types the token.
    Manual,
}

/// Where a resolved token is persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    DontSave,
    /// In the connection's `oauth_token` field.
    #[default]
    Config,
    /// In the secret store, keyed by connection name.
    PasswordManager,
}

impl std::fmt::Display for TokenMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenMethod::Oauth => write!(f, "oauth"),
            TokenMethod::Manual => write!(f, "manual"),
        }
    }
}

impl std::fmt::Display for SaveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveType::DontSave => write!(f, "dont_save"),
            SaveType::Config => write!(f, "config"),
            SaveType::PasswordManager => write!(f, "password_manager"),
        }
    }
}

/// A named, persisted binding of a provider, credentials and token policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub service: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub get_token_method: TokenMethod,
    #[serde(default)]
    pub save_type: SaveType,
    #[serde(default)]
    pub oauth_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub auth_timeout: Option<u64>,
}

impl Connection {
    pub fn new(name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            user_name: String::new(),
            get_token_method: TokenMethod::default(),
            save_type: SaveType::default(),
            oauth_token: None,
            client_id: None,
            port: None,
            auth_timeout: None,
        }
    }

    /// The persisted token, if present and non-empty.
    pub fn stored_token(&self) -> Option<&str> {
        self.oauth_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// The whole persisted document: `{ "version": .., "connections": [..] }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionsDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl ConnectionsDocument {
    pub fn find(&self, name: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}
