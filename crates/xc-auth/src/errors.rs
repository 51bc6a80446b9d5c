use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;

/// Authentication error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Provider rejected the request: {code} ({description})")]
    Provider { code: String, description: String },

    #[error("{step} failed with HTTP {status}: {body}")]
    ChainStep {
        step: ChainStep,
        status: u16,
        body: String,
    },

    #[error("Device code expired before the user completed authorization")]
    DeviceCodeExpired,

    #[error("No stored refresh token - silent refresh unavailable")]
    SilentRefreshUnavailable,

    #[error("Authentication flow was cancelled")]
    Cancelled,

    #[error("Invalid redirect URI or missing code")]
    InvalidRedirect,

    #[error("OAuth state mismatch - possible CSRF attack")]
    StateMismatch,

    #[error("Failed to bind callback listener on port {port}: {source}")]
    ReceiverBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Credential store is locked by another process")]
    LockTimeout,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication task failed: {0}")]
    Task(String),
}

impl AuthError {
    /// Transport failures may succeed on a later attempt; provider rejections will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Decode the `XErr` code of a rejected XSTS authorization
    pub fn xsts_denial(&self) -> Option<XstsDenial> {
        match self {
            Self::ChainStep {
                step: ChainStep::Xsts,
                body,
                ..
            } => serde_json::from_str::<crate::models::XstsErrorResponse>(body)
                .ok()
                .map(|e| XstsDenial::from_xerr(e.xerr)),
            _ => None,
        }
    }

    /// The account owns no game profile yet
    pub fn is_missing_profile(&self) -> bool {
        matches!(
            self,
            Self::ChainStep {
                step: ChainStep::Profile,
                status: 404,
                ..
            }
        )
    }
}

/// Connection-level failures reported by the transport client
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("{0}")]
    Other(#[source] reqwest::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Other(err)
        }
    }
}

/// The four calls of the identity chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    XboxLive,
    Xsts,
    GameLogin,
    Profile,
}

impl fmt::Display for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::XboxLive => "Xbox Live authentication",
            Self::Xsts => "XSTS authorization",
            Self::GameLogin => "Minecraft login",
            Self::Profile => "Minecraft profile fetch",
        };
        f.write_str(name)
    }
}

/// XSTS-specific error codes from XErr field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XstsDenial {
    #[error("Account doesn't have an Xbox account (XErr: 2148916233)")]
    NoXboxAccount,

    #[error("Xbox Live not available in this country (XErr: 2148916235)")]
    RegionNotSupported,

    #[error("Adult verification required on Xbox page (XErr: 2148916236/2148916237)")]
    AdultVerificationRequired,

    #[error("Child account requires Family (XErr: 2148916238)")]
    ChildAccountRequiresFamily,

    #[error("Unknown XSTS error code: {0}")]
    Unknown(u64),
}

impl XstsDenial {
    pub fn from_xerr(code: u64) -> Self {
        match code {
            2148916233 => Self::NoXboxAccount,
            2148916235 => Self::RegionNotSupported,
            2148916236 | 2148916237 => Self::AdultVerificationRequired,
            2148916238 => Self::ChildAccountRequiresFamily,
            code => Self::Unknown(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xsts_denial_from_chain_error() {
        let err = AuthError::ChainStep {
            step: ChainStep::Xsts,
            status: 401,
            body: r#"{"Identity":"0","XErr":2148916233,"Message":"","Redirect":""}"#.to_string(),
        };
        assert_eq!(err.xsts_denial(), Some(XstsDenial::NoXboxAccount));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_xsts_denial_only_for_xsts_step() {
        let err = AuthError::ChainStep {
            step: ChainStep::XboxLive,
            status: 401,
            body: r#"{"XErr":2148916233}"#.to_string(),
        };
        assert_eq!(err.xsts_denial(), None);
    }

    #[test]
    fn test_unknown_xerr() {
        assert_eq!(XstsDenial::from_xerr(42), XstsDenial::Unknown(42));
        assert_eq!(
            XstsDenial::from_xerr(2148916237),
            XstsDenial::AdultVerificationRequired
        );
    }

    #[test]
    fn test_missing_profile() {
        let err = AuthError::ChainStep {
            step: ChainStep::Profile,
            status: 404,
            body: String::new(),
        };
        assert!(err.is_missing_profile());
        assert_eq!(
            err.to_string(),
            "Minecraft profile fetch failed with HTTP 404: "
        );
    }
}
