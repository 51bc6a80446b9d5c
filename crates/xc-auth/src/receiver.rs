//! Local HTTP listener that captures the OAuth authorization code.
//!
//! The browser is redirected to `http://127.0.0.1:<port>/callback?code=...`,
//! the same loopback address the listener binds.
//! The first request carrying a `code` resolves [`RedirectReceiver::wait_for_code`];
//! every request, with or without a code, gets the same static confirmation page.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CALLBACK_PATH;
use crate::errors::{AuthError, Result};

/// How long `stop` waits for in-flight browser connections before aborting
const STOP_GRACE: Duration = Duration::from_secs(2);

const CONFIRMATION_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Sign-in complete</title>
    <style>
        body { font-family: sans-serif; display: flex; justify-content: center; align-items: center; min-height: 100vh; margin: 0; background: #1e1e1e; color: #e0e0e0; }
        .container { text-align: center; padding: 2rem; }
        h1 { color: #5cb85c; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Sign-in complete</h1>
        <p>You can close this window and return to the launcher.</p>
    </div>
</body>
</html>"#;

/// Query parameters captured from the redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

struct ReceiverState {
    captured: watch::Sender<Option<CallbackParams>>,
}

/// Running callback listener bound to a local port
#[derive(Debug)]
pub struct RedirectReceiver {
    local_addr: SocketAddr,
    captured: watch::Receiver<Option<CallbackParams>>,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl RedirectReceiver {
    /// Bind `127.0.0.1:port` and start serving the callback route.
    ///
    /// Port 0 picks a free port; see [`RedirectReceiver::local_addr`].
    pub async fn start(port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| {
                error!(port, error = %source, "Failed to bind redirect receiver");
                AuthError::ReceiverBind { port, source }
            })?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = watch::channel(None);
        let state = Arc::new(ReceiverState { captured: tx });
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Redirect receiver server error");
            }
        });

        info!(addr = %local_addr, "Redirect receiver listening");
        Ok(Self {
            local_addr,
            captured: rx,
            shutdown,
            server: Mutex::new(Some(server)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn callback_url(&self) -> String {
        format!("http://{}{}", self.local_addr, CALLBACK_PATH)
    }

    /// Suspend until a request with a `code` arrives.
    ///
    /// Resolves with [`AuthError::Cancelled`] if the receiver is stopped first.
    pub async fn wait_for_code(&self) -> Result<CallbackParams> {
        let mut captured = self.captured.clone();
        tokio::select! {
            biased;
            result = captured.wait_for(Option::is_some) => match result {
                Ok(value) => value.clone().ok_or(AuthError::Cancelled),
                Err(_) => Err(AuthError::Cancelled),
            },
            _ = self.shutdown.cancelled() => Err(AuthError::Cancelled),
        }
    }

    /// Shut the listener down and release the port; safe to call repeatedly
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.server.lock().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!("Redirect receiver did not drain in time, aborting");
                handle.abort();
                let _ = handle.await;
            }
            info!(addr = %self.local_addr, "Redirect receiver stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for RedirectReceiver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_callback(
    State(state): State<Arc<ReceiverState>>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    let Some(query) = query else {
        debug!("Callback request without query string");
        return Html(CONFIRMATION_PAGE);
    };

    let mut code = None;
    let mut callback_state = None;
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "state" => callback_state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match code {
        Some(code) => {
            let params = CallbackParams {
                code,
                state: callback_state,
            };
            let first = state.captured.send_if_modified(|slot| {
                if slot.is_none() {
                    *slot = Some(params);
                    true
                } else {
                    false
                }
            });
            if first {
                info!("Authorization code received");
            } else {
                debug!("Authorization code already captured, ignoring repeat callback");
            }
        }
        None => match error {
            Some(error) => warn!(%error, "Callback carried an error instead of a code"),
            None => debug!("Callback request without code parameter"),
        },
    }

    Html(CONFIRMATION_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(url: String) -> reqwest::StatusCode {
        reqwest::get(url).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_captures_code() {
        let receiver = RedirectReceiver::start(0).await.unwrap();
        let status = get(format!("{}?code=ABC123&state=xyz", receiver.callback_url())).await;
        assert!(status.is_success());

        let params = receiver.wait_for_code().await.unwrap();
        assert_eq!(params.code, "ABC123");
        assert_eq!(params.state.as_deref(), Some("xyz"));
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_missing_query_keeps_waiting() {
        let receiver = RedirectReceiver::start(0).await.unwrap();

        assert!(get(receiver.callback_url()).await.is_success());
        assert!(get(format!("{}?state=only", receiver.callback_url())).await.is_success());

        let waited =
            tokio::time::timeout(Duration::from_millis(300), receiver.wait_for_code()).await;
        assert!(waited.is_err(), "wait must not resolve without a code");

        get(format!("{}?code=late", receiver.callback_url())).await;
        assert_eq!(receiver.wait_for_code().await.unwrap().code, "late");
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_only_first_code_is_kept() {
        let receiver = RedirectReceiver::start(0).await.unwrap();
        get(format!("{}?code=first", receiver.callback_url())).await;
        let status = get(format!("{}?code=second", receiver.callback_url())).await;
        assert!(status.is_success());

        assert_eq!(receiver.wait_for_code().await.unwrap().code, "first");
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_port() {
        let receiver = RedirectReceiver::start(0).await.unwrap();
        let addr = receiver.local_addr();

        receiver.stop().await;
        receiver.stop().await;
        assert!(receiver.is_stopped());

        let result = tokio::time::timeout(Duration::from_secs(1), receiver.wait_for_code())
            .await
            .expect("cancelled wait must resolve");
        assert!(matches!(result, Err(AuthError::Cancelled)));

        tokio::net::TcpListener::bind(addr)
            .await
            .expect("port should be free after stop");
    }

    #[tokio::test]
    async fn test_stop_resolves_pending_wait() {
        let receiver = Arc::new(RedirectReceiver::start(0).await.unwrap());
        let waiter = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.wait_for_code().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        receiver.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = RedirectReceiver::start(port).await.unwrap_err();
        assert!(matches!(err, AuthError::ReceiverBind { port: p, .. } if p == port));
    }
}
