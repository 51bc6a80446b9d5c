use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::{Host, Url};

/// Microsoft, Xbox Live and Minecraft endpoints
pub mod endpoints {
    pub const MS_AUTHORIZE: &str =
        "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize";
    pub const MS_TOKEN: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
    pub const MS_DEVICE_CODE: &str =
        "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";

    pub const LIVE_AUTHORIZE: &str = "https://login.live.com/oauth20_authorize.srf";
    pub const LIVE_TOKEN: &str = "https://login.live.com/oauth20_token.srf";
    /// Live Connect desktop redirect; the user pastes it back from the address bar
    pub const LIVE_DESKTOP_REDIRECT: &str = "https://login.live.com/oauth20_desktop.srf";

    pub const XBL_AUTHENTICATE: &str = "https://user.auth.xboxlive.com/user/authenticate";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    pub const MC_LOGIN: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
    pub const MC_PROFILE: &str = "https://api.minecraftservices.com/minecraft/profile";
}

/// Standard OAuth scope for Xbox Live sign-in with a refresh token
pub const STANDARD_SCOPE: &str = "XboxLive.signin offline_access";

/// Relying parties
pub const RP_XBOX_AUTH: &str = "http://auth.xboxlive.com";
pub const RP_MINECRAFT: &str = "rp://api.minecraftservices.com/";

/// Fixed local port the redirect receiver listens on
pub const CALLBACK_PORT: u16 = 51735;
pub const CALLBACK_PATH: &str = "/callback";

/// Extra seconds added to the poll interval when the provider answers `slow_down`
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Which interactive protocol runs when silent refresh is not possible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractiveFlow {
    /// User enters a short code on microsoft.com/link
    #[default]
    Device,

    /// Browser redirect to the local callback listener
    Redirect,
}

/// Every URL the authentication pipeline talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub device_code: String,
    pub xbl_authenticate: String,
    pub xsts_authorize: String,
    pub mc_login: String,
    pub mc_profile: String,
}

impl Endpoints {
    /// Microsoft identity platform v2, `consumers` tenant
    pub fn consumers() -> Self {
        Self {
            authorize: endpoints::MS_AUTHORIZE.to_string(),
            token: endpoints::MS_TOKEN.to_string(),
            device_code: endpoints::MS_DEVICE_CODE.to_string(),
            xbl_authenticate: endpoints::XBL_AUTHENTICATE.to_string(),
            xsts_authorize: endpoints::XSTS_AUTHORIZE.to_string(),
            mc_login: endpoints::MC_LOGIN.to_string(),
            mc_profile: endpoints::MC_PROFILE.to_string(),
        }
    }

    /// Live Connect v1 authorize/token pair (redirect flow only, see
    /// [`AuthConfig::live_connect`])
    pub fn live_connect() -> Self {
        Self {
            authorize: endpoints::LIVE_AUTHORIZE.to_string(),
            token: endpoints::LIVE_TOKEN.to_string(),
            ..Self::consumers()
        }
    }

    /// All endpoints under a single base URL, for local mock servers
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize: format!("{base}/oauth2/v2.0/authorize"),
            token: format!("{base}/oauth2/v2.0/token"),
            device_code: format!("{base}/oauth2/v2.0/devicecode"),
            xbl_authenticate: format!("{base}/user/authenticate"),
            xsts_authorize: format!("{base}/xsts/authorize"),
            mc_login: format!("{base}/authentication/login_with_xbox"),
            mc_profile: format!("{base}/minecraft/profile"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::consumers()
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for the authentication pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// OAuth client ID of the registered Azure application
    pub client_id: String,

    /// OAuth scope requested for every grant
    pub scope: String,

    /// Redirect URI registered for the redirect flow
    pub redirect_uri: String,

    /// Port of the local redirect receiver
    pub callback_port: u16,

    /// Interactive protocol used when silent refresh fails
    pub flow: InteractiveFlow,

    pub endpoints: Endpoints,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,
}

impl AuthConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scope: STANDARD_SCOPE.to_string(),
            redirect_uri: format!("http://127.0.0.1:{CALLBACK_PORT}{CALLBACK_PATH}"),
            callback_port: CALLBACK_PORT,
            flow: InteractiveFlow::default(),
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("xchain".to_string()),
        }
    }

    /// Live Connect redirect login, finished by pasting the desktop redirect URL
    pub fn live_connect(client_id: impl Into<String>) -> Self {
        Self {
            redirect_uri: endpoints::LIVE_DESKTOP_REDIRECT.to_string(),
            flow: InteractiveFlow::Redirect,
            endpoints: Endpoints::live_connect(),
            ..Self::new(client_id)
        }
    }

    pub fn with_flow(mut self, flow: InteractiveFlow) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.into_config()
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content)
    }

    /// `<config_dir>/xchain/config.toml` for the current platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "xchain")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The redirect lands on a loopback address the local receiver can serve
    pub fn captures_redirect_locally(&self) -> bool {
        let Ok(url) = Url::parse(&self.redirect_uri) else {
            return false;
        };
        if url.scheme() != "http" {
            return false;
        }
        match url.host() {
            Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("client_id must be set to a registered Azure application ID")]
    MissingClientId,

    #[error("Unknown endpoint preset '{0}' (expected \"consumers\" or \"live_connect\")")]
    UnknownPreset(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    client_id: Option<String>,
    scope: Option<String>,
    redirect_uri: Option<String>,
    callback_port: Option<u16>,
    flow: Option<InteractiveFlow>,
    user_agent: Option<String>,
    #[serde(default)]
    timeouts: TimeoutsFile,
    #[serde(default)]
    endpoints: EndpointsFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeoutsFile {
    connect_secs: Option<u64>,
    request_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EndpointsFile {
    preset: Option<String>,
    authorize: Option<String>,
    token: Option<String>,
    device_code: Option<String>,
    xbl_authenticate: Option<String>,
    xsts_authorize: Option<String>,
    mc_login: Option<String>,
    mc_profile: Option<String>,
}

impl ConfigFile {
    fn into_config(self) -> Result<AuthConfig, ConfigError> {
        let mut config = AuthConfig::new(self.client_id.unwrap_or_default());

        if let Some(scope) = self.scope {
            config.scope = scope;
        }
        if let Some(flow) = self.flow {
            config.flow = flow;
        }
        if self.user_agent.is_some() {
            config.user_agent = self.user_agent;
        }
        if let Some(secs) = self.timeouts.connect_secs {
            config.http_timeouts.connect = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.request_secs {
            config.http_timeouts.request = Duration::from_secs(secs);
        }

        let ep = self.endpoints;
        let mut endpoints = match ep.preset.as_deref() {
            None | Some("consumers") => Endpoints::consumers(),
            Some("live_connect") => {
                config.redirect_uri = endpoints::LIVE_DESKTOP_REDIRECT.to_string();
                Endpoints::live_connect()
            }
            Some(other) => return Err(ConfigError::UnknownPreset(other.to_string())),
        };
        let overrides = [
            (ep.authorize, &mut endpoints.authorize),
            (ep.token, &mut endpoints.token),
            (ep.device_code, &mut endpoints.device_code),
            (ep.xbl_authenticate, &mut endpoints.xbl_authenticate),
            (ep.xsts_authorize, &mut endpoints.xsts_authorize),
            (ep.mc_login, &mut endpoints.mc_login),
            (ep.mc_profile, &mut endpoints.mc_profile),
        ];
        for (value, slot) in overrides {
            if let Some(value) = value {
                *slot = value;
            }
        }
        config.endpoints = endpoints;

        // An explicit port or URI beats the preset's redirect
        if let Some(port) = self.callback_port {
            config.callback_port = port;
            config.redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
        }
        if let Some(redirect_uri) = self.redirect_uri {
            config.redirect_uri = redirect_uri;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AuthConfig::from_toml_str("").unwrap();
        assert_eq!(config.scope, STANDARD_SCOPE);
        assert_eq!(config.callback_port, CALLBACK_PORT);
        assert_eq!(config.redirect_uri, "http://127.0.0.1:51735/callback");
        assert_eq!(config.flow, InteractiveFlow::Device);
        assert_eq!(config.endpoints, Endpoints::consumers());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingClientId)
        ));
    }

    #[test]
    fn test_overrides() {
        let config = AuthConfig::from_toml_str(
            r#"
            client_id = "abc"
            flow = "redirect"
            callback_port = 40000

            [timeouts]
            request_secs = 5

            [endpoints]
            preset = "live_connect"
            mc_profile = "http://127.0.0.1:9/profile"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.flow, InteractiveFlow::Redirect);
        assert_eq!(config.redirect_uri, "http://127.0.0.1:40000/callback");
        assert_eq!(config.http_timeouts.request, Duration::from_secs(5));
        assert_eq!(config.http_timeouts.connect, Duration::from_secs(15));
        assert_eq!(config.endpoints.token, endpoints::LIVE_TOKEN);
        assert_eq!(config.endpoints.mc_profile, "http://127.0.0.1:9/profile");
    }

    #[test]
    fn test_live_connect_preset_uses_desktop_redirect() {
        let config =
            AuthConfig::from_toml_str("client_id = \"abc\"\n[endpoints]\npreset = \"live_connect\"")
                .unwrap();
        assert_eq!(config.redirect_uri, endpoints::LIVE_DESKTOP_REDIRECT);
        assert_eq!(config.endpoints.authorize, endpoints::LIVE_AUTHORIZE);
        assert!(!config.captures_redirect_locally());

        let built = AuthConfig::live_connect("abc");
        assert_eq!(built.flow, InteractiveFlow::Redirect);
        assert_eq!(built.redirect_uri, config.redirect_uri);
    }

    #[test]
    fn test_captures_redirect_locally() {
        let mut config = AuthConfig::new("abc");
        assert!(config.captures_redirect_locally());

        for (uri, local) in [
            ("http://localhost:51735/callback", true),
            ("http://[::1]:51735/callback", true),
            ("https://127.0.0.1/callback", false),
            ("http://example.com/callback", false),
            ("not a url", false),
        ] {
            config.redirect_uri = uri.to_string();
            assert_eq!(config.captures_redirect_locally(), local, "{uri}");
        }
    }

    #[test]
    fn test_unknown_preset() {
        let result = AuthConfig::from_toml_str("[endpoints]\npreset = \"nope\"");
        assert!(matches!(result, Err(ConfigError::UnknownPreset(p)) if p == "nope"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            AuthConfig::from_toml_str("clientid = \"typo\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_rooted_endpoints() {
        let endpoints = Endpoints::rooted_at("http://127.0.0.1:1234/");
        assert_eq!(endpoints.token, "http://127.0.0.1:1234/oauth2/v2.0/token");
        assert_eq!(
            endpoints.mc_login,
            "http://127.0.0.1:1234/authentication/login_with_xbox"
        );
    }
}
