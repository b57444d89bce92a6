//! Interactive OAuth2 implicit-grant flow over a loopback listener.
//!
//! The provider redirects the browser to `http://localhost:<port>/get_token`
//! with the token in the URL fragment. Fragments never reach a server, so
//! the landing page reads it client-side and calls `/receive_token` with the
//! token as a query parameter. The first token received completes the flow.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::cloud::oauth_app::REDIRECT_PATH;
use crate::errors::{CloudError, Result};
use crate::platform;

/// Path the landing page reports the token to.
pub const RECEIVE_PATH: &str = "/receive_token";

/// Upper bound on waiting for the listener task after cancellation. Browsers
/// keep idle connections open, which would otherwise stall graceful shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>cloudfs</title></head>
<body>
<p id="status">Receiving token...</p>
<script>
  var params = new URLSearchParams(window.location.hash.substring(1));
  var token = params.get("access_token");
  var status = document.getElementById("status");
  if (token) {
    fetch("/receive_token?access_token=" + encodeURIComponent(token))
      .then(function () { status.textContent = "Token received. You can close this window."; })
      .catch(function () { status.textContent = "Could not deliver the token."; });
  } else {
    status.textContent = "No access token in the redirect: " + (params.get("error_description") || params.get("error") || "unknown error");
  }
</script>
</body>
</html>
"#;

const SUCCESS_PAGE: &str =
    "<html><body><p>Token received. You can close this window.</p></body></html>";

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Obtains an access token from the user for an authorize URL.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn acquire(&self, authorize_url: &str, port: u16, timeout: Duration) -> Result<String>;
}

/// Opens a URL for the user, normally in the default browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the platform's URL opener (`open`, `xdg-open`, `cmd /C start`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let (program, args) = platform::current_platform().open_command(url);
        std::process::Command::new(program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| CloudError::Auth(format!("cannot launch browser ({program}): {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Single-shot token slot shared by the listener's handlers.
#[derive(Clone)]
struct TokenSink(Arc<Mutex<Option<oneshot::Sender<String>>>>);

impl TokenSink {
    fn new(tx: oneshot::Sender<String>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    /// Deliver `token` if nothing was delivered yet. Returns whether it was taken.
    fn deliver(&self, token: String) -> bool {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(tx) => tx.send(token).is_ok(),
            None => false,
        }
    }
}

async fn landing_page() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

async fn receive_token(
    State(sink): State<TokenSink>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match params.get("access_token").map(|t| t.trim()) {
        Some(token) if !token.is_empty() => {
            if !sink.deliver(token.to_string()) {
                tracing::debug!("Ignoring repeated token delivery");
            }
            (StatusCode::OK, Html(SUCCESS_PAGE))
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Html("<html><body><p>Missing access_token.</p></body></html>"),
        ),
    }
}

fn build_router(sink: TokenSink) -> Router {
    Router::new()
        .route(REDIRECT_PATH, get(landing_page))
        .route(RECEIVE_PATH, get(receive_token))
        .with_state(sink)
}

// ---------------------------------------------------------------------------
// InteractiveAuthorizer
// ---------------------------------------------------------------------------

/// Runs the loopback flow: bind, open the browser, wait for one token.
pub struct InteractiveAuthorizer<B = SystemBrowser> {
    browser: B,
}

impl InteractiveAuthorizer<SystemBrowser> {
    pub fn new() -> Self {
        Self {
            browser: SystemBrowser,
        }
    }
}

impl Default for InteractiveAuthorizer<SystemBrowser> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BrowserLauncher> InteractiveAuthorizer<B> {
    pub fn with_browser(browser: B) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl<B: BrowserLauncher> Authorizer for InteractiveAuthorizer<B> {
    async fn acquire(&self, authorize_url: &str, port: u16, timeout: Duration) -> Result<String> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CloudError::Auth(format!("cannot listen on {addr}: {e}")))?;

        let (tx, rx) = oneshot::channel();
        let router = build_router(TokenSink::new(tx));
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("OAuth listener error: {}", e);
            }
        });
        tracing::info!(port, timeout_secs = timeout.as_secs(), "Waiting for OAuth redirect");

        if let Err(e) = self.browser.open(authorize_url) {
            tracing::warn!("{e}; open this URL manually: {authorize_url}");
        }

        let outcome = tokio::time::timeout(timeout, rx).await;

        cancel.cancel();
        let abort = server.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
            abort.abort();
        }

        match outcome {
            Ok(Ok(token)) => {
                tracing::info!(port, "OAuth token received");
                Ok(token)
            }
            Ok(Err(_)) => Err(CloudError::Auth("OAuth listener stopped unexpectedly".into())),
            Err(_) => Err(CloudError::AuthTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoBrowser;

    impl BrowserLauncher for NoBrowser {
        fn open(&self, _url: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Plays the browser: hits the listener the way the landing page would.
    struct DeliveringBrowser {
        port: u16,
        token: &'static str,
    }

    impl BrowserLauncher for DeliveringBrowser {
        fn open(&self, _url: &str) -> Result<()> {
            let url = format!(
                "http://127.0.0.1:{}{}?access_token={}",
                self.port, RECEIVE_PATH, self.token
            );
            tokio::spawn(async move {
                let _ = reqwest::get(url).await;
            });
            Ok(())
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let port = free_port();
        let authorizer = InteractiveAuthorizer::with_browser(NoBrowser);

        let err = authorizer
            .acquire("http://example.invalid/auth", port, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AuthTimeout { .. }));

        // The listener must be gone once acquire returns.
        TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_is_delivered() {
        let port = free_port();
        let authorizer = InteractiveAuthorizer::with_browser(DeliveringBrowser {
            port,
            token: "tok-123",
        });

        let token = authorizer
            .acquire("http://example.invalid/auth", port, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(token, "tok-123");
        TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_port_is_auth_error() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let authorizer = InteractiveAuthorizer::with_browser(NoBrowser);

        let err = authorizer
            .acquire("http://example.invalid/auth", port, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
    }

    #[tokio::test]
    async fn test_landing_page_forwards_fragment() {
        let (tx, _rx) = oneshot::channel();
        let resp = build_router(TokenSink::new(tx))
            .oneshot(Request::get(REDIRECT_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("window.location.hash"));
        assert!(html.contains(RECEIVE_PATH));
    }

    #[tokio::test]
    async fn test_first_token_wins() {
        let (tx, rx) = oneshot::channel();
        let router = build_router(TokenSink::new(tx));

        for token in ["first", "second"] {
            let uri = format!("{RECEIVE_PATH}?access_token={token}");
            let resp = router
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(rx.await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_missing_token_is_bad_request() {
        let (tx, _rx) = oneshot::channel();
        let resp = build_router(TokenSink::new(tx))
            .oneshot(Request::get(RECEIVE_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
