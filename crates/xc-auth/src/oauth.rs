use std::sync::Arc;

use tracing::{debug, instrument};
use url::Url;

use crate::config::AuthConfig;
use crate::errors::{AuthError, Result};
use crate::models::MsTokenResponse;
use crate::session::TokenPair;
use crate::transport::{HttpRequest, HttpTransport, RawResponse};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// How the token endpoint answered a grant request
#[derive(Debug)]
pub(crate) enum TokenOutcome {
    Issued(TokenPair),
    Pending,
    SlowDown,
    Expired,
    Empty,
    Rejected { code: String, description: String },
}

impl TokenOutcome {
    /// Classify a raw token endpoint response.
    ///
    /// A pair is only issued for a success status with a non-empty access token.
    pub(crate) fn classify(response: &RawResponse) -> Result<Self> {
        if response.is_empty() {
            return Ok(if response.is_success() {
                Self::Empty
            } else {
                Self::Rejected {
                    code: format!("http_{}", response.status.as_u16()),
                    description: String::new(),
                }
            });
        }

        let parsed: MsTokenResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(_) if !response.is_success() => {
                return Ok(Self::Rejected {
                    code: format!("http_{}", response.status.as_u16()),
                    description: response.snippet(),
                });
            }
            Err(e) => return Err(e),
        };

        if let Some(code) = parsed.error {
            return Ok(match code.as_str() {
                "authorization_pending" => Self::Pending,
                "slow_down" => Self::SlowDown,
                "expired_token" => Self::Expired,
                _ => Self::Rejected {
                    code,
                    description: parsed.error_description.unwrap_or_default(),
                },
            });
        }

        if !response.is_success() {
            return Ok(Self::Rejected {
                code: format!("http_{}", response.status.as_u16()),
                description: response.snippet(),
            });
        }

        if parsed.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "token response has no access_token".to_string(),
            ));
        }

        Ok(Self::Issued(TokenPair::new(
            parsed.access_token,
            parsed.refresh_token,
            parsed.expires_in,
        )))
    }

    /// Outcome of a one-shot grant, where anything but a token is final
    pub(crate) fn into_pair(self) -> Result<TokenPair> {
        match self {
            Self::Issued(pair) => Ok(pair),
            Self::Empty => Err(AuthError::InvalidResponse(
                "empty token response".to_string(),
            )),
            Self::Pending => Err(provider_error("authorization_pending", "")),
            Self::SlowDown => Err(provider_error("slow_down", "")),
            Self::Expired => Err(provider_error("expired_token", "")),
            Self::Rejected { code, description } => Err(AuthError::Provider { code, description }),
        }
    }
}

fn provider_error(code: &str, description: &str) -> AuthError {
    AuthError::Provider {
        code: code.to_string(),
        description: description.to_string(),
    }
}

/// POST a grant to the token endpoint and classify the answer
pub(crate) async fn request_token(
    transport: &HttpTransport,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenOutcome> {
    let response = transport
        .send(HttpRequest::post_form(token_url, form))
        .await?;
    TokenOutcome::classify(&response)
}

/// Authorization-code and refresh-token grants against the Microsoft token endpoint
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    config: Arc<AuthConfig>,
    transport: HttpTransport,
}

impl TokenExchangeClient {
    pub fn new(config: Arc<AuthConfig>, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    /// Build the authorization URL for the user to visit
    #[instrument(skip(self))]
    pub fn authorize_url(&self, state: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoints.authorize)?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("prompt", "select_account");

        if let Some(s) = state {
            url.query_pairs_mut().append_pair("state", s);
        }

        debug!("Built authorize URL");
        Ok(url)
    }

    /// Extract the authorization code from the URL the browser landed on.
    ///
    /// `access_denied` means the user backed out and maps to
    /// [`AuthError::Cancelled`]; any other `error` is a provider rejection.
    #[instrument(skip(self, redirect_url, expected_state))]
    pub fn parse_redirect(&self, redirect_url: &str, expected_state: Option<&str>) -> Result<String> {
        let url = Url::parse(redirect_url)?;
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut description = String::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" if !value.is_empty() => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = value.into_owned(),
                _ => {}
            }
        }

        match error.as_deref() {
            Some("access_denied") => return Err(AuthError::Cancelled),
            Some(_) => {
                return Err(AuthError::Provider {
                    code: error.unwrap_or_default(),
                    description,
                });
            }
            None => {}
        }

        if expected_state.is_some() && state.as_deref() != expected_state {
            return Err(AuthError::StateMismatch);
        }
        code.ok_or(AuthError::InvalidRedirect)
    }

    /// Exchange an authorization code for Microsoft tokens
    #[instrument(skip(self, code))]
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<TokenPair> {
        debug!("Exchanging authorization code for tokens");
        request_token(
            &self.transport,
            &self.config.endpoints.token,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", GRANT_AUTHORIZATION_CODE),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scope.as_str()),
            ],
        )
        .await?
        .into_pair()
    }

    /// Refresh Microsoft tokens using a refresh token
    #[instrument(skip(self, refresh_token))]
    pub async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        debug!("Refreshing Microsoft access token");
        request_token(
            &self.transport,
            &self.config.endpoints.token,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", GRANT_REFRESH_TOKEN),
                ("refresh_token", refresh_token),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scope.as_str()),
            ],
        )
        .await?
        .into_pair()
    }
}
