use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No response was obtained at all.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response from a provider, with the provider-supplied message.
    #[error("Error code: {status}; {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The provider lacks the capability. Raised locally, no request is made.
    #[error("{service}: {operation} is not supported")]
    Unsupported {
        service: &'static str,
        operation: &'static str,
    },

    #[error("Command is not supported: {0}")]
    CommandNotSupported(String),

    #[error("Command format error: {0}")]
    CommandFormat(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Authorization was not completed within {seconds}s")]
    AuthTimeout { seconds: u64 },

    #[error("OAuth2 error: {0}")]
    OAuth2(String),

    #[error("Operation error: {0}")]
    OperationFailed(String),

    #[error("Operation is too long: still pending after {polls} checks")]
    OperationTimeout { polls: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Connection with such name already exists: {0}")]
    ConnectionExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Lock conflict: {path}")]
    LockConflict { path: PathBuf },

    #[error("{0}")]
    Application(String),
}

pub type Result<T> = std::result::Result<T, CloudError>;

impl CloudError {
    /// HTTP-equivalent status code, when the error came from a provider response.
    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Api { status, .. } => Some(*status),
            CloudError::NotFound(_) => Some(404),
            CloudError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for the 409-equivalent "already exists" class.
    pub fn is_conflict(&self) -> bool {
        match self {
            CloudError::Io(e) => e.kind() == std::io::ErrorKind::AlreadyExists,
            _ => self.status() == Some(409),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CloudError::Unsupported { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            CloudError::Auth(_) | CloudError::AuthTimeout { .. } | CloudError::OAuth2(_)
        )
    }
}

/// Shorthand for [`CloudError::Unsupported`].
pub fn unsupported(service: &'static str, operation: &'static str) -> CloudError {
    CloudError::Unsupported { service, operation }
}

/// Maps a `CloudError` to user-friendly CLI output with actionable suggestions.
pub fn handle_command_error(err: &CloudError) {
    use crate::output;

    match err {
        CloudError::Auth(msg) => {
            output::error(&format!("Authentication error: {}", msg));
            output::info("Check the connection's token settings with `cloudfs connection list`.");
        }
        CloudError::AuthTimeout { seconds } => {
            output::error(&format!(
                "Authorization was not completed within {}s",
                seconds
            ));
            output::info("Raise the connection's auth timeout or finish the browser flow sooner.");
        }
        CloudError::Api { status: 401, message } => {
            output::error(&format!("Access denied: {}", message));
            output::info("The stored token may have expired. Clear it and authorize again.");
        }
        CloudError::Api { status: 409, message } => {
            output::error(&format!("Already exists: {}", message));
            output::info("Pass --overwrite to replace the existing resource.");
        }
        CloudError::Api { status, message } => {
            output::error(&format!("Provider error ({}): {}", status, message));
        }
        CloudError::Unsupported { .. } => {
            output::error(&format!("{}", err));
        }
        CloudError::UnknownProvider(key) => {
            output::error(&format!("Unknown provider: {}", key));
            output::info("Run `cloudfs providers` to see the available providers.");
        }
        CloudError::ConnectionNotFound(name) => {
            output::error(&format!("Connection not found: {}", name));
            output::info("Run `cloudfs connection list` to see configured connections.");
        }
        CloudError::Transport(e) => {
            output::error(&format!("Network error: {}", e));
            output::info("Check your internet connection.");
        }
        CloudError::Io(e) => {
            output::error(&format!("File error: {}", e));
        }
        CloudError::LockConflict { path } => {
            output::error(&format!("Lock conflict: {}", path.display()));
            output::info("Another process may be using this resource. Wait and try again.");
        }
        _ => {
            output::error(&format!("{}", err));
        }
    }
}
