use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{AuthConfig, SLOW_DOWN_STEP};
use crate::errors::{AuthError, Result};
use crate::models::DeviceCodeResponse;
use crate::oauth::{GRANT_DEVICE_CODE, GRANT_REFRESH_TOKEN, TokenOutcome, request_token};
use crate::session::TokenPair;
use crate::transport::{HttpRequest, HttpTransport};

/// Poll interval used when the provider omits one (RFC 8628 §3.2)
const DEFAULT_INTERVAL_SECS: u64 = 5;
/// Lifetime used when the provider omits one
const DEFAULT_EXPIRES_IN_SECS: u64 = 900;

/// Device authorization issued by the provider
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCode {
    /// Secret polled against the token endpoint, never shown to the user
    pub device_code: String,
    /// Short code the user types at `verification_uri`
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds between poll attempts, at least 1
    pub interval: u64,
    /// Seconds until the device code stops being accepted
    pub expires_in: u64,
    /// Ready-made instruction text, when the provider sends one
    pub message: Option<String>,
}

impl fmt::Debug for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCode")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("interval", &self.interval)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// OAuth device-code grant: request a code, then poll until the user approves it
#[derive(Debug)]
pub struct DeviceCodePoller {
    config: Arc<AuthConfig>,
    transport: HttpTransport,
    cancel: CancellationToken,
    slow_down_step: Duration,
}

impl DeviceCodePoller {
    pub fn new(config: Arc<AuthConfig>, transport: HttpTransport) -> Self {
        Self {
            config,
            transport,
            cancel: CancellationToken::new(),
            slow_down_step: SLOW_DOWN_STEP,
        }
    }

    /// Ask the provider for a device code and user code
    #[instrument(skip(self))]
    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        let request = HttpRequest::post_form(
            &self.config.endpoints.device_code,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
            ],
        );
        let response = self.transport.send(request).await?;

        if response.is_empty() {
            return Err(AuthError::InvalidResponse(
                "empty device code response".to_string(),
            ));
        }

        let parsed: DeviceCodeResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(_) if !response.is_success() => {
                return Err(AuthError::Provider {
                    code: format!("http_{}", response.status.as_u16()),
                    description: response.snippet(),
                });
            }
            Err(e) => return Err(e),
        };

        if let Some(code) = parsed.error {
            return Err(AuthError::Provider {
                code,
                description: parsed.error_description.unwrap_or_default(),
            });
        }
        if !response.is_success() || parsed.device_code.is_empty() {
            return Err(AuthError::Provider {
                code: format!("http_{}", response.status.as_u16()),
                description: response.snippet(),
            });
        }

        let interval = match parsed.interval {
            0 => DEFAULT_INTERVAL_SECS,
            n => n,
        };
        let expires_in = match parsed.expires_in {
            0 => DEFAULT_EXPIRES_IN_SECS,
            n => n,
        };

        info!(
            interval,
            expires_in, "Device code issued, waiting for user authorization"
        );
        Ok(DeviceCode {
            device_code: parsed.device_code,
            user_code: parsed.user_code,
            verification_uri: parsed.verification_uri,
            interval,
            expires_in,
            message: parsed.message,
        })
    }

    /// Poll the token endpoint until the user authorizes the device code.
    ///
    /// Sleeps one interval before every attempt and gives up with
    /// [`AuthError::DeviceCodeExpired`] once `expires_in` has elapsed.
    #[instrument(skip(self, code), fields(user_code = %code.user_code))]
    pub async fn poll_for_token(&self, code: &DeviceCode) -> Result<TokenPair> {
        let started = Instant::now();
        let window = Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval.max(1));
        let mut attempts = 0u32;
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", GRANT_DEVICE_CODE),
            ("device_code", code.device_code.as_str()),
        ];

        loop {
            let elapsed = started.elapsed();
            if elapsed >= window {
                warn!(attempts, "Device code expired while polling");
                return Err(AuthError::DeviceCodeExpired);
            }

            let wait = interval.min(window - elapsed);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }

            attempts += 1;
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                outcome = request_token(&self.transport, &self.config.endpoints.token, &form) => outcome?,
            };

            match outcome {
                TokenOutcome::Issued(pair) => {
                    info!(attempts, "Device code authorized");
                    return Ok(pair);
                }
                TokenOutcome::Pending | TokenOutcome::Empty => {
                    debug!(attempts, "Authorization pending");
                }
                TokenOutcome::SlowDown => {
                    interval += self.slow_down_step;
                    debug!(
                        attempts,
                        interval_secs = interval.as_secs_f64(),
                        "Provider asked to slow down"
                    );
                }
                TokenOutcome::Expired => return Err(AuthError::DeviceCodeExpired),
                TokenOutcome::Rejected { code, description } => {
                    return Err(AuthError::Provider { code, description });
                }
            }
        }
    }

    /// Single refresh-token grant, no polling
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_with_token(&self, refresh_token: &str) -> Result<TokenPair> {
        request_token(
            &self.transport,
            &self.config.endpoints.token,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", GRANT_REFRESH_TOKEN),
                ("refresh_token", refresh_token),
                ("scope", self.config.scope.as_str()),
            ],
        )
        .await?
        .into_pair()
    }

    /// Cancel any in-flight poll; safe to call repeatedly
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Stopping device code poller");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poller_for(server: &MockServer) -> DeviceCodePoller {
        let config = Arc::new(
            AuthConfig::new("test-client").with_endpoints(Endpoints::rooted_at(&server.uri())),
        );
        let transport = HttpTransport::new(&config).unwrap();
        DeviceCodePoller::new(config, transport)
    }

    fn device_code(interval: u64, expires_in: u64) -> DeviceCode {
        DeviceCode {
            device_code: "dev-secret".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://microsoft.com/link".to_string(),
            interval,
            expires_in,
            message: None,
        }
    }

    fn pending() -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending",
            "error_description": "The user has not yet completed authorization"
        }))
    }

    fn issued() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "access_token": "ms-access",
            "refresh_token": "ms-refresh",
            "expires_in": 3600
        }))
    }

    #[tokio::test]
    async fn test_request_device_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/devicecode"))
            .and(body_string_contains("client_id=test-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-secret",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/link",
                "expires_in": 900,
                "interval": 5,
                "message": "To sign in, use a web browser..."
            })))
            .mount(&server)
            .await;

        let code = poller_for(&server).request_device_code().await.unwrap();
        assert_eq!(code.user_code, "ABCD-EFGH");
        assert_eq!(code.interval, 5);
        assert_eq!(code.expires_in, 900);
        assert!(!format!("{code:?}").contains("dev-secret"));
    }

    #[tokio::test]
    async fn test_request_device_code_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/devicecode"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "unknown client"
            })))
            .mount(&server)
            .await;

        let err = poller_for(&server).request_device_code().await.unwrap_err();
        assert!(matches!(err, AuthError::Provider { code, .. } if code == "invalid_client"));
    }

    #[tokio::test]
    async fn test_poll_pending_twice_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(pending())
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dev-secret"))
            .respond_with(issued())
            .with_priority(2)
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let pair = poller_for(&server)
            .poll_for_token(&device_code(1, 60))
            .await
            .unwrap();

        assert_eq!(pair.access_token, "ms-access");
        assert!(started.elapsed() >= Duration::from_secs(2));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_poll_expires() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(pending())
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = poller_for(&server)
            .poll_for_token(&device_code(1, 2))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::DeviceCodeExpired));
        assert!(started.elapsed() <= Duration::from_secs(3) + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_poll_slow_down_widens_interval() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "slow_down"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(issued())
            .with_priority(2)
            .mount(&server)
            .await;

        let mut poller = poller_for(&server);
        poller.slow_down_step = Duration::from_millis(500);

        let started = std::time::Instant::now();
        poller.poll_for_token(&device_code(1, 60)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_poll_fatal_error_stops_loop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "authorization_declined",
                "error_description": "The user declined"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = poller_for(&server)
            .poll_for_token(&device_code(1, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Provider { code, .. } if code == "authorization_declined"));
    }

    #[tokio::test]
    async fn test_poll_empty_error_status_stops_loop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = poller_for(&server)
            .poll_for_token(&device_code(1, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Provider { code, .. } if code == "http_401"));
    }

    #[tokio::test]
    async fn test_stop_cancels_poll_and_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .respond_with(pending())
            .mount(&server)
            .await;

        let poller = Arc::new(poller_for(&server));
        let task = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_for_token(&device_code(1, 60)).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        poller.stop();
        poller.stop();
        assert!(poller.is_stopped());

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("poll should resolve after stop")
            .unwrap();
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_refresh_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(issued())
            .expect(1)
            .mount(&server)
            .await;

        let pair = poller_for(&server)
            .refresh_with_token("old-refresh")
            .await
            .unwrap();
        assert_eq!(pair.refresh_token, "ms-refresh");
    }
}
