//! Token lifecycle: interactive authorization, manual entry, persistence,
//! and the per-connection resolver that ties them together.

pub mod authorizer;
pub mod manager;
pub mod prompt;
pub mod secret_store;

pub use authorizer::{Authorizer, BrowserLauncher, InteractiveAuthorizer, SystemBrowser};
pub use manager::ConnectionManager;
pub use prompt::{DialoguerPrompt, TokenPrompt};
pub use secret_store::{FileSecretStore, MemorySecretStore, SecretStore};
