use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

/// Authenticated game session produced by the identity chain
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    display_name: String,
    access_token: String,
    stable_id: String,
}

impl Session {
    pub(crate) fn new(display_name: String, access_token: String, stable_id: String) -> Self {
        Self {
            display_name,
            access_token,
            stable_id,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Minecraft services access token (treat as a secret)
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Dashed UUID of the game profile
    pub fn stable_id(&self) -> &str {
        &self.stable_id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("display_name", &self.display_name)
            .field("access_token", &"[REDACTED]")
            .field("stable_id", &self.stable_id)
            .finish()
    }
}

/// Microsoft OAuth access/refresh token pair
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Longest access-token lifetime taken at face value (100 years)
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl TokenPair {
    pub fn new(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in,
        }
    }

    /// Absolute expiry of the access token, measured from now
    ///
    /// Lifetimes are capped at [`MAX_TOKEN_LIFETIME_SECS`] so the instant
    /// always fits `chrono` and serializes as a four-digit year.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = self.expires_in.min(MAX_TOKEN_LIFETIME_SECS);
        i64::try_from(lifetime)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Xbox Live token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XblToken {
    pub token: String,
    pub uhs: String,
}

/// XSTS token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XstsToken {
    pub token: String,
    pub uhs: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let session = Session::new(
            "Steve".to_string(),
            "secret-mc".to_string(),
            "01234567-89ab-cdef-0123-456789abcdef".to_string(),
        );
        let rendered = format!("{session:?}");
        assert!(rendered.contains("Steve"));
        assert!(!rendered.contains("secret-mc"));

        let pair = TokenPair::new("secret-a".to_string(), "secret-r".to_string(), 3600);
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("secret-a"));
        assert!(!rendered.contains("secret-r"));
    }

    #[test]
    fn test_expires_at_in_future() {
        let pair = TokenPair::new("a".to_string(), "r".to_string(), 3600);
        assert!(pair.expires_at() > Utc::now());
    }

    #[test]
    fn test_expires_at_saturates_on_huge_lifetime() {
        let ceiling = Utc::now() + TimeDelta::seconds(MAX_TOKEN_LIFETIME_SECS as i64 + 60);
        for expires_in in [10_000_000_000_000_000, u64::MAX, i64::MAX as u64] {
            let pair = TokenPair::new("a".to_string(), "r".to_string(), expires_in);
            let expires_at = pair.expires_at();
            assert!(expires_at > Utc::now() + TimeDelta::days(365 * 99));
            assert!(expires_at < ceiling);

            // Stored credentials must read back what was written
            let json = serde_json::to_string(&expires_at).unwrap();
            let back: DateTime<Utc> = serde_json::from_str(&json).unwrap();
            assert_eq!(back, expires_at);
        }
    }
}
