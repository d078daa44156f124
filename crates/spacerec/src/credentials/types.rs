//! Core credential types.

use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Cookie carrying the primary auth secret.
pub const PRIMARY_COOKIE: &str = "auth_token";
/// Cookie carrying the secondary verification secret.
pub const SECONDARY_COOKIE: &str = "ct0";
/// Header mirroring the secondary verification secret.
pub const VERIFICATION_HEADER: &str = "x-csrf-token";

/// Environment variables consulted as the lowest-precedence layer, in order.
pub const PRIMARY_ENV_VARS: &[&str] = &["SPACEREC_AUTH_TOKEN", "TWITTER_AUTH_TOKEN"];
pub const SECONDARY_ENV_VARS: &[&str] = &["SPACEREC_CSRF_TOKEN", "TWITTER_CSRF_TOKEN"];

/// The pair of opaque secrets attached to outbound requests.
///
/// Either value may be absent. Values are never validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Primary auth secret.
    pub primary: Option<String>,
    /// Secondary verification secret.
    pub secondary: Option<String>,
}

impl Credentials {
    pub fn new(primary: Option<String>, secondary: Option<String>) -> Self {
        Self { primary, secondary }
    }

    /// Read the fallback layer through `lookup` (normally `std::env::var`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |names: &[&str]| names.iter().find_map(|name| lookup(name));
        Self {
            primary: first(PRIMARY_ENV_VARS),
            secondary: first(SECONDARY_ENV_VARS),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Fill fields that are still unset from a lower-precedence layer.
    pub fn fill_missing(&mut self, lower: Credentials) {
        if self.primary.is_none() {
            self.primary = lower.primary;
        }
        if self.secondary.is_none() {
            self.secondary = lower.secondary;
        }
    }

    fn primary_value(&self) -> Option<&str> {
        self.primary.as_deref().filter(|v| !v.is_empty())
    }

    fn secondary_value(&self) -> Option<&str> {
        self.secondary.as_deref().filter(|v| !v.is_empty())
    }

    /// `auth_token=..; ct0=..` built from whichever values are present.
    pub fn cookie(&self) -> Option<String> {
        let mut parts = Vec::with_capacity(2);
        if let Some(primary) = self.primary_value() {
            parts.push(format!("{PRIMARY_COOKIE}={primary}"));
        }
        if let Some(secondary) = self.secondary_value() {
            parts.push(format!("{SECONDARY_COOKIE}={secondary}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    /// The minimal header set for an authenticated request.
    ///
    /// Empty when both values are absent; callers treat that as an
    /// unauthenticated request.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(cookie) = self.cookie() {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(e) => warn!(error = %e, "Credential cookie is not a valid header value"),
            }
        }

        if let Some(secondary) = self.secondary_value() {
            match HeaderValue::from_str(secondary) {
                Ok(value) => {
                    headers.insert(VERIFICATION_HEADER, value);
                }
                Err(e) => warn!(error = %e, "Verification secret is not a valid header value"),
            }
        }

        headers
    }

    pub fn status(&self) -> AuthStatus {
        AuthStatus {
            has_primary: self.primary_value().is_some(),
            has_secondary: self.secondary_value().is_some(),
        }
    }
}

/// Which secrets are currently configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub has_primary: bool,
    pub has_secondary: bool,
}

/// On-disk credential record.
///
/// Unknown fields are ignored and a field holding anything but a string is
/// treated as absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFile {
    #[serde(default, alias = "authToken", deserialize_with = "lenient_string")]
    pub primary_auth_value: Option<String>,
    #[serde(default, alias = "csrfToken", deserialize_with = "lenient_string")]
    pub secondary_verification_value: Option<String>,
}

impl CredentialFile {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn into_credentials(self) -> Credentials {
        Credentials {
            primary: self.primary_auth_value,
            secondary: self.secondary_verification_value,
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_owned))
}
