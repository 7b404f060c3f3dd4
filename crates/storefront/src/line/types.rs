//! LINE Login API types.

use secrecy::SecretString;
use serde::Deserialize;

/// Tokens returned by the code exchange.
#[derive(Debug, Clone)]
pub struct LineTokens {
    pub access_token: SecretString,
    /// Present when the `openid` scope was granted.
    pub id_token: Option<String>,
}

/// `GET /v2/profile` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineProfileInfo {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
}

/// Everything learned about a user from one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIdentity {
    pub profile: LineProfileInfo,
    /// Only present if the user granted the email permission.
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct IdTokenClaims {
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parses_camel_case() {
        let profile: LineProfileInfo = serde_json::from_str(
            r#"{"userId":"U4af4980629","displayName":"Aki","pictureUrl":"https://profile.line-scdn.net/x","statusMessage":"hi"}"#,
        )
        .unwrap();
        assert_eq!(profile.user_id, "U4af4980629");
        assert_eq!(profile.picture_url.as_deref(), Some("https://profile.line-scdn.net/x"));
    }

    #[test]
    fn test_claims_without_email() {
        let claims: IdTokenClaims =
            serde_json::from_str(r#"{"iss":"https://access.line.me","sub":"U1","aud":"1650000000"}"#)
                .unwrap();
        assert!(claims.email.is_none());
    }
}
