use serde::{Deserialize, Serialize};

/// Microsoft token endpoint response.
///
/// Success and error payloads share this shape; every field is optional so
/// the caller can classify the answer after decoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MsTokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Microsoft device authorization response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceCodeResponse {
    #[serde(default)]
    pub device_code: String,
    #[serde(default)]
    pub user_code: String,
    #[serde(default, alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Xbox Live user.authenticate request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XblAuthRequest {
    pub properties: XblAuthProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XblAuthProperties {
    pub auth_method: String,
    pub site_name: String,
    pub rps_ticket: String,
}

/// XSTS authorize request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthRequest {
    pub properties: XstsAuthProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthProperties {
    pub sandbox_id: String,
    pub user_tokens: Vec<String>,
}

/// Xbox Live and XSTS share one response shape
#[derive(Debug, Clone, Deserialize)]
pub struct XboxTokenResponse {
    #[serde(rename = "Token", alias = "token")]
    pub token: String,
    #[serde(rename = "DisplayClaims", alias = "displayClaims")]
    pub display_claims: XblDisplayClaims,
    #[serde(rename = "NotAfter", alias = "notAfter", default)]
    pub not_after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XblDisplayClaims {
    #[serde(alias = "users")]
    pub xui: Vec<XblUserInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XblUserInfo {
    pub uhs: String,
}

/// XSTS error response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    pub xerr: u64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Minecraft login_with_xbox request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McLoginRequest {
    pub identity_token: String,
}

/// Minecraft login_with_xbox response
#[derive(Debug, Clone, Deserialize)]
pub struct McLoginResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
}

/// Minecraft profile response
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct McProfile {
    /// UUID without dashes
    pub id: String,
    /// Player name
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xbox_response_pascal_case() {
        let body = r#"{
            "IssueInstant": "2024-01-01T00:00:00Z",
            "NotAfter": "2024-01-15T00:00:00Z",
            "Token": "xbl-token",
            "DisplayClaims": { "xui": [ { "uhs": "1234" } ] }
        }"#;
        let parsed: XboxTokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.token, "xbl-token");
        assert_eq!(parsed.display_claims.xui[0].uhs, "1234");
        assert_eq!(parsed.not_after.as_deref(), Some("2024-01-15T00:00:00Z"));
    }

    #[test]
    fn test_xbox_response_camel_case() {
        let body = r#"{"token":"t1","displayClaims":{"users":[{"uhs":"h1"}]}}"#;
        let parsed: XboxTokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.token, "t1");
        assert_eq!(parsed.display_claims.xui[0].uhs, "h1");
    }

    #[test]
    fn test_xbl_request_shape() {
        let request = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: "d=abc".to_string(),
            },
            relying_party: "http://auth.xboxlive.com".to_string(),
            token_type: "JWT".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["Properties"]["RpsTicket"], "d=abc");
        assert_eq!(value["RelyingParty"], "http://auth.xboxlive.com");
        assert_eq!(value["TokenType"], "JWT");
    }

    #[test]
    fn test_token_error_payload() {
        let body = r#"{"error":"authorization_pending","error_description":"waiting"}"#;
        let parsed: MsTokenResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.access_token.is_empty());
        assert_eq!(parsed.error.as_deref(), Some("authorization_pending"));
    }
}
