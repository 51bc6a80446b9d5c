use reqwest::header::{ACCEPT, HeaderName};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::AuthConfig;
use crate::errors::{Result, TransportError};

/// Request body variants understood by the identity endpoints
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// A single outbound HTTP call
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(HeaderName, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn post_form<K, V>(url: impl Into<String>, pairs: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let pairs = pairs
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Form(pairs),
        }
    }

    pub fn post_json<T: serde::Serialize>(url: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Json(serde_json::to_value(payload)?),
        })
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Raw status and body of a completed HTTP exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// First 200 characters of the body, for error reports
    pub fn snippet(&self) -> String {
        self.text().chars().take(200).collect()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// HTTP transport shared by every protocol step.
///
/// Non-2xx answers are returned as-is; only connection-level failures become
/// errors. No retries happen here.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("xchain"))
            .build()
            .map_err(TransportError::from)?;

        Ok(Self { http })
    }

    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: HttpRequest) -> Result<RawResponse> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .header(ACCEPT, "application/json");

        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        builder = match request.body {
            Body::Empty => builder,
            Body::Form(pairs) => builder.form(&pairs),
            Body::Json(value) => builder.json(&value),
        };

        let response = builder.send().await.map_err(TransportError::from)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(TransportError::from)?
            .to_vec();

        debug!(status = status.as_u16(), len = body.len(), "HTTP exchange complete");
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AuthError;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(&AuthConfig::new("client")).unwrap()
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let request = HttpRequest::post_form(format!("{}/token", server.uri()), &[("a", "b")]);
        let response = transport().send(request).await.unwrap();

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(!response.is_success());
        assert!(response.text().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_form_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/form"))
            .and(header("accept", "application/json"))
            .and(header("x-xbl-contract-version", "1"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let request = HttpRequest::post_form(
            format!("{}/form", server.uri()),
            &[("grant_type", "refresh_token")],
        )
        .header(HeaderName::from_static("x-xbl-contract-version"), "1");
        let response = transport().send(request).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        // Bind then drop a listener so the port is closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport()
            .send(HttpRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_empty_body_detection() {
        let response = RawResponse {
            status: StatusCode::OK,
            body: b" \n".to_vec(),
        };
        assert!(response.is_empty());
    }
}
