//! Microsoft account sign-in for Minecraft services
//!
//! This crate turns a Microsoft account into an authenticated game session.
//!
//! # Authentication Flow
//!
//! 1. Silent refresh with a stored Microsoft refresh token, when one exists
//! 2. Otherwise an interactive login: device code (default) or browser redirect
//! 3. Xbox Live authentication
//! 4. XSTS authorization
//! 5. Minecraft Services login
//! 6. Profile retrieval
//!
//! Every successful token exchange is persisted through a [`CredentialStore`]
//! so the next run can sign in without the user.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use xc_auth::{AuthConfig, Authenticator, FileCredentialStore};
//!
//! # async fn example() -> xc_auth::Result<()> {
//! let config = AuthConfig::new("00000000-0000-0000-0000-000000000000");
//! let store = FileCredentialStore::new(FileCredentialStore::default_path()?).await?;
//! let auth = Arc::new(Authenticator::new(config, Arc::new(store))?);
//!
//! // Await on whichever executor owns the UI state
//! let session = auth.spawn().await?;
//! println!("Signed in as {} ({})", session.display_name(), session.stable_id());
//! # Ok(())
//! # }
//! ```
//!
//! # Important Notes
//!
//! - A client id registered with Microsoft is required; there is no default
//! - Tokens and device codes are never logged, and `Debug` output redacts them
//! - The stored credential is plain JSON protected only by file permissions

pub mod chain;
pub mod config;
pub mod device;
pub mod errors;
pub mod file_store;
pub mod flow;
pub mod models;
pub mod oauth;
pub mod orchestrator;
pub mod receiver;
pub mod session;
pub mod store;
pub mod transport;

// Re-export main types
pub use chain::{GameToken, IdentityChain};
pub use config::{AuthConfig, ConfigError, Endpoints, HttpTimeouts, InteractiveFlow};
pub use device::{DeviceCode, DeviceCodePoller};
pub use errors::{AuthError, ChainStep, Result, TransportError, XstsDenial};
pub use file_store::FileCredentialStore;
pub use flow::{DeviceFlow, LogPrompt, LoginFlow, LoginPrompt, RedirectFlow};
pub use oauth::TokenExchangeClient;
pub use orchestrator::{AuthState, AuthTask, Authenticator};
pub use receiver::{CallbackParams, RedirectReceiver};
pub use session::{Session, TokenPair};
pub use store::{CredentialStore, MemoryCredentialStore, StoredCredential};
pub use transport::HttpTransport;
