use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::chain::IdentityChain;
use crate::config::{AuthConfig, InteractiveFlow};
use crate::errors::{AuthError, Result};
use crate::flow::{LogPrompt, LoginFlow, LoginPrompt, flow_for};
use crate::session::{Session, TokenPair};
use crate::store::CredentialStore;
use crate::transport::HttpTransport;

/// Where an authentication attempt currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    SilentRefreshAttempt,
    NeedsInteractive,
    DeviceFlow,
    RedirectFlow,
    ChainResolution,
    Authenticated(Session),
    Failed { reason: String },
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated(_) | Self::Failed { .. })
    }
}

/// Drives silent refresh, the interactive fallback and the identity chain
pub struct Authenticator {
    config: Arc<AuthConfig>,
    transport: HttpTransport,
    chain: IdentityChain,
    store: Arc<dyn CredentialStore>,
    prompt: Arc<dyn LoginPrompt>,
    /// The one flow allowed to hold the callback port or poll at a time
    active: Mutex<Option<Arc<dyn LoginFlow>>>,
    state: watch::Sender<AuthState>,
}

impl Authenticator {
    pub fn new(config: AuthConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let transport = HttpTransport::new(&config)?;
        let chain = IdentityChain::new(config.clone(), transport.clone());
        let (state, _) = watch::channel(AuthState::Idle);

        Ok(Self {
            config,
            transport,
            chain,
            store,
            prompt: Arc::new(LogPrompt),
            active: Mutex::new(None),
            state,
        })
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn LoginPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Run one full authentication attempt
    pub async fn authenticate(&self) -> Result<Session> {
        self.attempt(self.new_flow()).await
    }

    /// Run [`Authenticator::authenticate`] on its own task.
    ///
    /// Cancelling the returned task stops the flow this attempt created and
    /// leaves any newer attempt running.
    pub fn spawn(self: Arc<Self>) -> AuthTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let flow = self.new_flow();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    if self.finish_flow(&flow).await {
                        self.publish(AuthState::Failed {
                            reason: AuthError::Cancelled.to_string(),
                        });
                    }
                    Err(AuthError::Cancelled)
                }
                result = self.attempt(flow.clone()) => result,
            }
        });

        AuthTask { handle, cancel }
    }

    /// Stop the running interactive flow, if any
    pub async fn stop_active(&self) {
        let active = self.active.lock().await.take();
        if let Some(flow) = active {
            debug!(flow = ?flow.kind(), "Stopping active login flow");
            flow.stop().await;
        }
    }

    /// Forget the stored credential
    pub async fn logout(&self) -> Result<()> {
        self.stop_active().await;
        self.store.clear().await?;
        self.publish(AuthState::Idle);
        info!("Logged out");
        Ok(())
    }

    #[instrument(skip_all, fields(flow = ?flow.kind()))]
    async fn attempt(&self, flow: Arc<dyn LoginFlow>) -> Result<Session> {
        self.begin_flow(flow.clone()).await;
        let result = self.run(flow.as_ref()).await;
        let current = self.finish_flow(&flow).await;

        // A superseded attempt must not overwrite the state of its successor
        match &result {
            Ok(session) => self.publish(AuthState::Authenticated(session.clone())),
            Err(e) if current => self.publish(AuthState::Failed {
                reason: e.to_string(),
            }),
            Err(e) => debug!(error = %e, "Superseded attempt ended"),
        }
        result
    }

    async fn run(&self, flow: &dyn LoginFlow) -> Result<Session> {
        self.publish(AuthState::SilentRefreshAttempt);
        let tokens = match self.silent_refresh(flow).await {
            Ok(tokens) => tokens,
            Err(AuthError::SilentRefreshUnavailable) => {
                debug!("No stored refresh token");
                self.interactive(flow).await?
            }
            Err(e) => {
                warn!(error = %e, "Silent refresh failed, falling back to interactive login");
                self.interactive(flow).await?
            }
        };

        self.publish(AuthState::ChainResolution);
        self.chain.resolve(&tokens.access_token).await
    }

    async fn silent_refresh(&self, flow: &dyn LoginFlow) -> Result<TokenPair> {
        if !self.store.can_refresh().await {
            return Err(AuthError::SilentRefreshUnavailable);
        }
        let credential = self
            .store
            .load()
            .await?
            .filter(|c| c.can_refresh())
            .ok_or(AuthError::SilentRefreshUnavailable)?;

        let tokens = flow.refresh(&credential.refresh_token).await?;
        info!("Silent refresh succeeded");
        self.remember(&tokens).await;
        Ok(tokens)
    }

    async fn interactive(&self, flow: &dyn LoginFlow) -> Result<TokenPair> {
        self.publish(AuthState::NeedsInteractive);
        self.publish(match flow.kind() {
            InteractiveFlow::Device => AuthState::DeviceFlow,
            InteractiveFlow::Redirect => AuthState::RedirectFlow,
        });

        let tokens = flow.acquire(self.prompt.as_ref()).await?;
        info!("Interactive login completed");
        self.remember(&tokens).await;
        Ok(tokens)
    }

    async fn remember(&self, tokens: &TokenPair) {
        if let Err(e) = self.store.persist(tokens).await {
            warn!(error = %e, "Failed to persist credential");
        }
    }

    fn new_flow(&self) -> Arc<dyn LoginFlow> {
        flow_for(self.config.clone(), self.transport.clone())
    }

    /// Make `flow` the active one, stopping whichever flow held the slot
    async fn begin_flow(&self, flow: Arc<dyn LoginFlow>) {
        let previous = self.active.lock().await.replace(flow);
        if let Some(previous) = previous {
            debug!("Stopping previous login flow");
            previous.stop().await;
        }
    }

    /// Stop `flow` and release the slot if it still holds it.
    ///
    /// Returns whether `flow` was the active one.
    async fn finish_flow(&self, flow: &Arc<dyn LoginFlow>) -> bool {
        let mut active = self.active.lock().await;
        let current = active.as_ref().is_some_and(|a| Arc::ptr_eq(a, flow));
        if current {
            active.take();
        }
        drop(active);
        flow.stop().await;
        current
    }

    fn publish(&self, state: AuthState) {
        debug!(?state, "Auth state");
        self.state.send_replace(state);
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("flow", &self.config.flow)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Handle to an authentication attempt running on a tokio task
#[derive(Debug)]
pub struct AuthTask {
    handle: JoinHandle<Result<Session>>,
    cancel: CancellationToken,
}

impl AuthTask {
    /// Stop this attempt's own flow; the task resolves with [`AuthError::Cancelled`]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for AuthTask {
    type Output = Result<Session>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(AuthError::Cancelled)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(AuthError::Task(e.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
