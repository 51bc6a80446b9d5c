//! Interactive login strategies.
//!
//! Both flows share the same shape: a silent `refresh` from a stored refresh
//! token, an interactive `acquire` that involves the user through a
//! [`LoginPrompt`], and an idempotent `stop`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{AuthConfig, InteractiveFlow};
use crate::device::{DeviceCode, DeviceCodePoller};
use crate::errors::{AuthError, Result};
use crate::oauth::TokenExchangeClient;
use crate::receiver::RedirectReceiver;
use crate::session::TokenPair;
use crate::transport::HttpTransport;

/// Surface that shows the user what to do during an interactive login
#[async_trait::async_trait]
pub trait LoginPrompt: Send + Sync {
    /// Show the user code and where to enter it
    async fn show_device_code(&self, code: &DeviceCode) -> Result<()>;

    /// Send the user to the authorization page
    async fn open_authorize_url(&self, url: &Url) -> Result<()>;

    /// Ask the user for the URL the browser landed on after signing in.
    ///
    /// Only used when the redirect URI is not served by the local receiver.
    async fn read_redirect(&self) -> Result<String> {
        Err(AuthError::InvalidRedirect)
    }
}

/// Prompt that only writes instructions to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPrompt;

#[async_trait::async_trait]
impl LoginPrompt for LogPrompt {
    async fn show_device_code(&self, code: &DeviceCode) -> Result<()> {
        match &code.message {
            Some(message) => info!("{message}"),
            None => info!(
                user_code = %code.user_code,
                verification_uri = %code.verification_uri,
                "Enter the code at the verification page to sign in"
            ),
        }
        Ok(())
    }

    async fn open_authorize_url(&self, url: &Url) -> Result<()> {
        info!(%url, "Open this URL in a browser to sign in");
        Ok(())
    }
}

/// One way of obtaining Microsoft tokens
#[async_trait::async_trait]
pub trait LoginFlow: Send + Sync {
    fn kind(&self) -> InteractiveFlow;

    /// Exchange a stored refresh token without involving the user
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;

    /// Run the interactive login until the user completes or it is stopped
    async fn acquire(&self, prompt: &dyn LoginPrompt) -> Result<TokenPair>;

    /// Stop any in-flight interaction; safe to call repeatedly
    async fn stop(&self);
}

/// Build the flow selected in the configuration
pub fn flow_for(config: Arc<AuthConfig>, transport: HttpTransport) -> Arc<dyn LoginFlow> {
    match config.flow {
        InteractiveFlow::Device => Arc::new(DeviceFlow::new(config, transport)),
        InteractiveFlow::Redirect => Arc::new(RedirectFlow::new(config, transport)),
    }
}

/// Device-code login
#[derive(Debug)]
pub struct DeviceFlow {
    poller: DeviceCodePoller,
}

impl DeviceFlow {
    pub fn new(config: Arc<AuthConfig>, transport: HttpTransport) -> Self {
        Self {
            poller: DeviceCodePoller::new(config, transport),
        }
    }
}

#[async_trait::async_trait]
impl LoginFlow for DeviceFlow {
    fn kind(&self) -> InteractiveFlow {
        InteractiveFlow::Device
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.poller.refresh_with_token(refresh_token).await
    }

    #[instrument(skip_all)]
    async fn acquire(&self, prompt: &dyn LoginPrompt) -> Result<TokenPair> {
        if self.poller.is_stopped() {
            return Err(AuthError::Cancelled);
        }

        let code = self.poller.request_device_code().await?;
        prompt.show_device_code(&code).await?;
        self.poller.poll_for_token(&code).await
    }

    async fn stop(&self) {
        self.poller.stop();
    }
}

/// Browser redirect login, captured by the local receiver or pasted back by the user
#[derive(Debug)]
pub struct RedirectFlow {
    client: TokenExchangeClient,
    callback_port: u16,
    local_capture: bool,
    receiver: Mutex<Option<Arc<RedirectReceiver>>>,
    cancel: CancellationToken,
}

impl RedirectFlow {
    pub fn new(config: Arc<AuthConfig>, transport: HttpTransport) -> Self {
        let callback_port = config.callback_port;
        let local_capture = config.captures_redirect_locally();
        Self {
            client: TokenExchangeClient::new(config, transport),
            callback_port,
            local_capture,
            receiver: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    async fn release_receiver(&self) {
        let receiver = self.receiver.lock().await.take();
        if let Some(receiver) = receiver {
            receiver.stop().await;
        }
    }

    async fn wait_for_redirect(&self, receiver: &RedirectReceiver, state: &str) -> Result<String> {
        let params = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
            params = receiver.wait_for_code() => params?,
        };

        if params.state.as_deref() != Some(state) {
            warn!("Redirect state does not match the issued state");
            return Err(AuthError::StateMismatch);
        }
        Ok(params.code)
    }

    /// Redirects that never reach this machine are pasted back by the user
    async fn read_pasted_redirect(&self, prompt: &dyn LoginPrompt) -> Result<String> {
        let state = Uuid::new_v4().to_string();
        let url = self.client.authorize_url(Some(&state))?;
        prompt.open_authorize_url(&url).await?;

        let pasted = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
            pasted = prompt.read_redirect() => pasted?,
        };
        self.client.parse_redirect(pasted.trim(), Some(&state))
    }

    async fn capture_redirect(&self, prompt: &dyn LoginPrompt) -> Result<String> {
        let receiver = Arc::new(RedirectReceiver::start(self.callback_port).await?);
        *self.receiver.lock().await = Some(receiver.clone());

        let state = Uuid::new_v4().to_string();
        let outcome = async {
            let url = self.client.authorize_url(Some(&state))?;
            prompt.open_authorize_url(&url).await?;
            self.wait_for_redirect(&receiver, &state).await
        }
        .await;
        self.release_receiver().await;
        outcome
    }
}

#[async_trait::async_trait]
impl LoginFlow for RedirectFlow {
    fn kind(&self) -> InteractiveFlow {
        InteractiveFlow::Redirect
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.client.exchange_refresh_token(refresh_token).await
    }

    #[instrument(skip_all, fields(port = self.callback_port, local = self.local_capture))]
    async fn acquire(&self, prompt: &dyn LoginPrompt) -> Result<TokenPair> {
        if self.cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let code = if self.local_capture {
            self.capture_redirect(prompt).await?
        } else {
            self.read_pasted_redirect(prompt).await?
        };
        debug!("Authorization code captured, exchanging");
        self.client.exchange_authorization_code(&code).await
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.release_receiver().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline(flow: InteractiveFlow) -> Arc<dyn LoginFlow> {
        let config = Arc::new(AuthConfig::new("test-client").with_flow(flow));
        let transport = HttpTransport::new(&config).unwrap();
        flow_for(config, transport)
    }

    #[test]
    fn test_flow_for_follows_config() {
        assert_eq!(offline(InteractiveFlow::Device).kind(), InteractiveFlow::Device);
        assert_eq!(
            offline(InteractiveFlow::Redirect).kind(),
            InteractiveFlow::Redirect
        );
    }

    #[tokio::test]
    async fn test_log_prompt_cannot_read_redirect() {
        assert!(matches!(
            LogPrompt.read_redirect().await,
            Err(AuthError::InvalidRedirect)
        ));
    }

    #[tokio::test]
    async fn test_stopped_flows_refuse_to_start() {
        for kind in [InteractiveFlow::Device, InteractiveFlow::Redirect] {
            let flow = offline(kind);
            flow.stop().await;
            flow.stop().await;

            let result = flow.acquire(&LogPrompt).await;
            assert!(matches!(result, Err(AuthError::Cancelled)));
        }
    }
}
