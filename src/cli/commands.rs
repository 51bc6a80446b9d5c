//! Handlers for login, status, and logout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use xc_auth::{
    AuthConfig, AuthError, Authenticator, CredentialStore, FileCredentialStore,
};

use super::prompt::ConsolePrompt;
use super::{Cli, LoginArgs};

/// Handle `xchain login`.
pub async fn handle_login(cli: &Cli, args: &LoginArgs) -> Result<()> {
    let mut config = load_config(cli).await?;
    if let Some(flow) = args.flow {
        config = config.with_flow(flow.into());
    }

    let store = open_store(cli).await?;
    let prompt = ConsolePrompt {
        open_browser: !args.no_browser,
    };
    let auth = Arc::new(
        Authenticator::new(config, store)
            .context("Invalid configuration")?
            .with_prompt(Arc::new(prompt)),
    );

    let mut task = auth.spawn();
    let result = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling sign-in");
            task.cancel();
            task.await
        }
    };

    match result {
        Ok(session) => {
            println!("Signed in as {} ({})", session.display_name(), session.stable_id());
            Ok(())
        }
        Err(e) => Err(explain(e)),
    }
}

/// Handle `xchain status`.
pub async fn handle_status(cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;

    match store.load().await.context("Failed to read stored credential")? {
        Some(credential) => {
            let refresh = if credential.can_refresh() {
                "available"
            } else {
                "missing"
            };
            let access = if credential.is_expired() {
                "expired"
            } else {
                "valid"
            };
            println!("Refresh token: {refresh}");
            println!(
                "Microsoft access token: {access} (expires {})",
                credential.expires_at.to_rfc3339()
            );
            println!("Last updated: {}", credential.updated_at.to_rfc3339());
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

/// Handle `xchain logout`.
pub async fn handle_logout(cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    store
        .clear()
        .await
        .context("Failed to remove stored credential")?;
    println!("Signed out");
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<AuthConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => AuthConfig::default_path().filter(|p| p.exists()),
    };

    let mut config = match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading config");
            AuthConfig::load(&path)
                .await
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => AuthConfig::new(String::new()),
    };

    if let Some(client_id) = &cli.client_id {
        config.client_id = client_id.clone();
    }
    if config.client_id.trim().is_empty() {
        bail!("No client id configured; pass --client-id or set XCHAIN_CLIENT_ID");
    }
    Ok(config)
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn CredentialStore>> {
    let path: PathBuf = match &cli.credentials {
        Some(path) => path.clone(),
        None => FileCredentialStore::default_path()?,
    };
    let store = FileCredentialStore::new(&path)
        .await
        .with_context(|| format!("Failed to open credential store at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Attach actionable help to the errors a user can do something about
fn explain(error: AuthError) -> anyhow::Error {
    if let Some(denial) = error.xsts_denial() {
        return anyhow::Error::new(error).context(denial.to_string());
    }
    if error.is_missing_profile() {
        return anyhow::Error::new(error)
            .context("This account does not own Minecraft or has no profile yet");
    }
    match error {
        AuthError::DeviceCodeExpired => {
            anyhow::Error::new(error).context("The code expired, run login again")
        }
        AuthError::ReceiverBind { port, .. } => anyhow::Error::new(error)
            .context(format!("Port {port} is busy; try --flow device")),
        other => anyhow::Error::new(other),
    }
}
