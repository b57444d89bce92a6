//! Manual token entry.

use dialoguer::theme::ColorfulTheme;
use dialoguer::Password;

use crate::errors::{CloudError, Result};
use crate::output;

/// Title and label shown when asking for a token by hand.
pub const TOKEN_PROMPT: &str = "Enter oauth token";

/// Asks the user for a line of text.
///
/// Returns `None` when the user cancels or enters nothing.
pub trait TokenPrompt: Send + Sync {
    fn prompt_text(&self, title: &str, label: &str) -> Result<Option<String>>;
}

/// Hidden-input terminal prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerPrompt;

impl TokenPrompt for DialoguerPrompt {
    fn prompt_text(&self, title: &str, label: &str) -> Result<Option<String>> {
        if title != label {
            output::info(title);
        }
        let entered = Password::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .allow_empty_password(true)
            .interact();

        match entered {
            Ok(text) => Ok(non_empty(text)),
            Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(CloudError::Application(format!("Token prompt error: {e}"))),
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
