use std::time::Duration;

use jiff::Timestamp;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};

/// A token is treated as expired this long before its actual expiry, so
/// an in-flight request never crosses the boundary mid-call.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(5 * 60);

/// In-memory OAuth credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Absolute expiry instant.
    pub expires_at: Timestamp,
    pub scopes: Vec<String>,
    pub subscription_type: Option<String>,
    pub token_type: String,
}

impl Credentials {
    /// Valid iff the access token is non-empty and expiry is more than
    /// [`EXPIRY_SKEW`] away from `now`.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        if self.access_token.expose_secret().is_empty() {
            return false;
        }

        let skew = jiff::SignedDuration::try_from(EXPIRY_SKEW).unwrap_or_default();
        now.checked_add(skew).map(|t| t < self.expires_at).unwrap_or(false)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Timestamp::now())
    }
}

/// On-disk shape: `{"claudeAiOauth": {...}}` with camelCase fields and
/// `expiresAt` in epoch milliseconds.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct CredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    pub claude_ai_oauth: OAuthTokenFile,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OAuthTokenFile {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl From<&Credentials> for CredentialsFile {
    fn from(credentials: &Credentials) -> Self {
        Self {
            claude_ai_oauth: OAuthTokenFile {
                access_token: credentials.access_token.expose_secret().to_string(),
                refresh_token: credentials.refresh_token.expose_secret().to_string(),
                expires_at: credentials.expires_at.as_millisecond(),
                scopes: credentials.scopes.clone(),
                subscription_type: credentials.subscription_type.clone(),
                token_type: credentials.token_type.clone(),
            },
        }
    }
}

impl From<CredentialsFile> for Credentials {
    fn from(file: CredentialsFile) -> Self {
        let token = file.claude_ai_oauth;
        Self {
            access_token: SecretString::from(token.access_token),
            refresh_token: SecretString::from(token.refresh_token),
            expires_at: Timestamp::from_millisecond(token.expires_at).unwrap_or(Timestamp::UNIX_EPOCH),
            scopes: token.scopes,
            subscription_type: token.subscription_type,
            token_type: token.token_type,
        }
    }
}

/// Cached account profile fetched alongside credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountProfile {
    #[serde(default)]
    pub organization: Option<OrganizationInfo>,
    #[serde(default)]
    pub account: Option<AccountInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub organization_type: Option<String>,
    #[serde(default)]
    pub billing_type: Option<String>,
    #[serde(default)]
    pub rate_limit_tier: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub has_claude_pro: Option<bool>,
    #[serde(default)]
    pub has_claude_max: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(expires_in_secs: i64) -> Credentials {
        Credentials {
            access_token: SecretString::from("tok"),
            refresh_token: SecretString::from("refresh"),
            expires_at: Timestamp::now() + jiff::SignedDuration::from_secs(expires_in_secs),
            scopes: vec!["user:inference".to_string()],
            subscription_type: Some("max".to_string()),
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn validity_respects_the_five_minute_skew() {
        assert!(credentials(3600).is_valid());
        // Inside the skew window counts as expired.
        assert!(!credentials(4 * 60).is_valid());
        assert!(!credentials(-1).is_valid());
    }

    #[test]
    fn empty_access_token_is_invalid() {
        let mut creds = credentials(3600);
        creds.access_token = SecretString::from("");
        assert!(!creds.is_valid());
    }

    #[test]
    fn file_shape_round_trips_with_millisecond_expiry() {
        let raw = r#"{
            "claudeAiOauth": {
                "accessToken": "at-1",
                "refreshToken": "rt-1",
                "expiresAt": 1750000000000,
                "scopes": ["user:inference"],
                "subscriptionType": "max",
                "tokenType": "Bearer"
            }
        }"#;

        let file: CredentialsFile = serde_json::from_str(raw).unwrap();
        let credentials = Credentials::from(file);

        assert_eq!(credentials.expires_at.as_millisecond(), 1_750_000_000_000);
        assert_eq!(credentials.token_type, "Bearer");

        let back = CredentialsFile::from(&credentials);
        let value = serde_json::to_value(&back).unwrap();
        assert_eq!(value["claudeAiOauth"]["accessToken"], "at-1");
        assert_eq!(value["claudeAiOauth"]["expiresAt"], 1_750_000_000_000i64);
    }
}
