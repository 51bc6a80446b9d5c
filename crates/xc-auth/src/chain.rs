use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderName};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::config::{AuthConfig, RP_MINECRAFT, RP_XBOX_AUTH};
use crate::errors::{AuthError, ChainStep, Result};
use crate::models::*;
use crate::session::{Session, XblToken, XstsToken};
use crate::transport::{HttpRequest, HttpTransport, RawResponse};

const XBL_CONTRACT_VERSION: HeaderName = HeaderName::from_static("x-xbl-contract-version");

/// Game-service credential returned by login_with_xbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameToken {
    pub token_type: String,
    pub access_token: String,
}

/// Exchanges a Microsoft access token for a Minecraft session:
/// Xbox Live → XSTS → login_with_xbox → profile, strictly in that order.
#[derive(Debug, Clone)]
pub struct IdentityChain {
    config: Arc<AuthConfig>,
    transport: HttpTransport,
}

impl IdentityChain {
    pub fn new(config: Arc<AuthConfig>, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    /// Run the whole chain; no partial session is ever returned
    #[instrument(skip(self, ms_access_token))]
    pub async fn resolve(&self, ms_access_token: &str) -> Result<Session> {
        let xbl = self.xbl_authenticate(ms_access_token).await?;
        let xsts = self.xsts_authorize(&xbl.token).await?;
        // The user hash must come from XSTS, not Xbox Live
        let game = self.game_login(&xsts.token, &xsts.uhs).await?;
        let session = self.fetch_profile(&game).await?;

        info!(player = session.display_name(), "Identity chain resolved");
        Ok(session)
    }

    /// Authenticate with Xbox Live
    #[instrument(skip(self, ms_access_token))]
    pub async fn xbl_authenticate(&self, ms_access_token: &str) -> Result<XblToken> {
        let request = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: format!("d={ms_access_token}"),
            },
            relying_party: RP_XBOX_AUTH.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authenticating with Xbox Live");
        let response = self
            .post(&self.config.endpoints.xbl_authenticate, &request)
            .await?;
        let parsed: XboxTokenResponse = decode(ChainStep::XboxLive, &response)?;
        let uhs = first_user_hash(ChainStep::XboxLive, &response, &parsed)?;

        Ok(XblToken {
            token: parsed.token,
            uhs,
        })
    }

    /// Authorize with XSTS for the Minecraft services relying party
    #[instrument(skip(self, xbl_token))]
    pub async fn xsts_authorize(&self, xbl_token: &str) -> Result<XstsToken> {
        let request = XstsAuthRequest {
            properties: XstsAuthProperties {
                sandbox_id: "RETAIL".to_string(),
                user_tokens: vec![xbl_token.to_string()],
            },
            relying_party: RP_MINECRAFT.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let response = self
            .post(&self.config.endpoints.xsts_authorize, &request)
            .await?;
        let parsed: XboxTokenResponse = decode(ChainStep::Xsts, &response)?;
        let uhs = first_user_hash(ChainStep::Xsts, &response, &parsed)?;

        Ok(XstsToken {
            token: parsed.token,
            uhs,
        })
    }

    /// Login to Minecraft services with the XSTS token
    #[instrument(skip(self, xsts_token, uhs))]
    pub async fn game_login(&self, xsts_token: &str, uhs: &str) -> Result<GameToken> {
        let request = McLoginRequest {
            identity_token: format!("XBL3.0 x={uhs};{xsts_token}"),
        };

        debug!("Logging in to Minecraft Services");
        let response = self.post(&self.config.endpoints.mc_login, &request).await?;
        let parsed: McLoginResponse = decode(ChainStep::GameLogin, &response)?;

        if parsed.access_token.is_empty() {
            return Err(step_error(ChainStep::GameLogin, &response));
        }
        Ok(GameToken {
            token_type: parsed.token_type,
            access_token: parsed.access_token,
        })
    }

    /// Fetch the Minecraft profile and build the session
    #[instrument(skip(self, game))]
    pub async fn fetch_profile(&self, game: &GameToken) -> Result<Session> {
        debug!("Fetching Minecraft profile");
        let request = HttpRequest::get(&self.config.endpoints.mc_profile)
            .header(
                AUTHORIZATION,
                format!("{} {}", game.token_type, game.access_token),
            )
            .header(XBL_CONTRACT_VERSION, "1");
        let response = self.transport.send(request).await?;
        let profile: McProfile = decode(ChainStep::Profile, &response)?;

        if profile.name.is_empty() {
            return Err(step_error(ChainStep::Profile, &response));
        }
        let stable_id = dashed_uuid(&profile.id)?;

        Ok(Session::new(
            profile.name,
            game.access_token.clone(),
            stable_id,
        ))
    }

    async fn post<T: serde::Serialize>(&self, url: &str, payload: &T) -> Result<RawResponse> {
        let request = HttpRequest::post_json(url, payload)?.header(XBL_CONTRACT_VERSION, "1");
        self.transport.send(request).await
    }
}

/// Reformat a compact 32-hex-digit profile id as 8-4-4-4-12
pub fn dashed_uuid(id: &str) -> Result<String> {
    uuid::Uuid::parse_str(id)
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|e| AuthError::InvalidResponse(format!("profile id '{id}' is not a UUID: {e}")))
}

fn step_error(step: ChainStep, response: &RawResponse) -> AuthError {
    AuthError::ChainStep {
        step,
        status: response.status.as_u16(),
        body: response.snippet(),
    }
}

fn decode<T: DeserializeOwned>(step: ChainStep, response: &RawResponse) -> Result<T> {
    if !response.is_success() || response.is_empty() {
        return Err(step_error(step, response));
    }
    response.json().map_err(|e| {
        debug!(%step, error = %e, "Undecodable chain response");
        step_error(step, response)
    })
}

fn first_user_hash(
    step: ChainStep,
    response: &RawResponse,
    parsed: &XboxTokenResponse,
) -> Result<String> {
    match parsed.display_claims.xui.first() {
        Some(user) if !parsed.token.is_empty() && !user.uhs.is_empty() => Ok(user.uhs.clone()),
        _ => Err(step_error(step, response)),
    }
}
