//! OAuth application settings and authorize-URL construction.

use std::sync::{PoisonError, RwLock};

use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope};

use crate::config::settings::DEFAULT_OAUTH_PORT;
use crate::errors::{CloudError, Result};

/// Path on the loopback listener that the provider redirects to.
pub const REDIRECT_PATH: &str = "/get_token";

#[derive(Debug, Clone)]
struct AppSettings {
    client_id: String,
    port: u16,
}

/// Per-provider OAuth2 implicit-grant settings.
///
/// Client id and port can be changed after construction, so they sit behind
/// a lock rather than requiring `&mut self`.
#[derive(Debug)]
pub struct OAuthApp {
    auth_url: &'static str,
    scope: Option<&'static str>,
    default_client_id: &'static str,
    settings: RwLock<AppSettings>,
}

impl OAuthApp {
    pub fn new(auth_url: &'static str, scope: Option<&'static str>, client_id: &'static str) -> Self {
        Self {
            auth_url,
            scope,
            default_client_id: client_id,
            settings: RwLock::new(AppSettings {
                client_id: client_id.to_string(),
                port: DEFAULT_OAUTH_PORT,
            }),
        }
    }

    pub fn client_id(&self) -> String {
        self.read().client_id
    }

    pub fn set_client_id(&self, client_id: &str) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .client_id = client_id.to_string();
    }

    /// Back to the built-in client id.
    pub fn reset_client_id(&self) {
        self.set_client_id(self.default_client_id);
    }

    pub fn port(&self) -> u16 {
        self.read().port
    }

    pub fn set_port(&self, port: u16) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .port = port;
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port(), REDIRECT_PATH)
    }

    /// Authorize URL requesting a token in the redirect fragment (`response_type=token`).
    pub fn authorize_url(&self) -> Result<String> {
        let settings = self.read();
        if settings.client_id.is_empty() {
            return Err(CloudError::Config(
                "no OAuth client id configured for this provider".into(),
            ));
        }

        let auth_url = AuthUrl::new(self.auth_url.to_string())
            .map_err(|e| CloudError::OAuth2(format!("Invalid auth URL: {e}")))?;
        let redirect_url = RedirectUrl::new(self.redirect_uri())
            .map_err(|e| CloudError::OAuth2(format!("Invalid redirect URI: {e}")))?;

        let client = BasicClient::new(ClientId::new(settings.client_id))
            .set_auth_uri(auth_url)
            .set_redirect_uri(redirect_url);

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .use_implicit_flow();
        if let Some(scope) = self.scope {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        let (url, _csrf) = request.url();
        Ok(url.to_string())
    }

    fn read(&self) -> AppSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
