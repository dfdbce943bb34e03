//! OAuth2 protocol types.

use serde::{Deserialize, Serialize};

/// Tokens returned by the token endpoint. Held in process memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Lifetime in seconds; 0 when the provider did not say.
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Signed-in user's profile as reported by the userinfo endpoint.
///
/// Accepts both `sub` (OpenID Connect) and `id` (Google v1 userinfo) for the
/// subject identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "id")]
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl UserProfile {
    /// Name to show in the UI: display name, then email, then subject.
    pub fn display_label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

/// A ready-to-follow authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationLink {
    pub url: String,
    /// The signed state token embedded in `url`.
    pub state: String,
    pub code_challenge: String,
}

/// Outcome of a completed callback.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub tokens: TokenSet,
    pub profile: UserProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_set_defaults() {
        let json = r#"{ "access_token": "ya29.token" }"#;

        let tokens: TokenSet = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "ya29.token");
        assert_eq!(tokens.refresh_token, None);
        assert_eq!(tokens.id_token, None);
        assert_eq!(tokens.expires_in, 0);
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[test]
    fn test_token_set_full_response() {
        let json = r#"{
            "access_token": "ya29.token",
            "refresh_token": "1//refresh",
            "id_token": "eyJ.id.token",
            "expires_in": 3599,
            "token_type": "Bearer",
            "scope": "openid email profile"
        }"#;

        let tokens: TokenSet = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(tokens.id_token.as_deref(), Some("eyJ.id.token"));
        assert_eq!(tokens.expires_in, 3599);
    }

    #[test]
    fn test_user_profile_deserialize_sub_field() {
        let json = r#"{
            "sub": "123456789",
            "email": "user@example.com",
            "email_verified": true,
            "name": "Test User",
            "picture": "https://example.com/me.png"
        }"#;

        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.sub, "123456789");
        assert_eq!(profile.email.as_deref(), Some("user@example.com"));
        assert_eq!(profile.picture.as_deref(), Some("https://example.com/me.png"));
    }

    #[test]
    fn test_user_profile_deserialize_id_field() {
        let json = r#"{ "id": "987", "email": "user@example.com" }"#;

        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.sub, "987");
        assert_eq!(profile.name, None);
    }

    #[test]
    fn test_display_label_fallbacks() {
        let mut profile = UserProfile {
            sub: "42".to_string(),
            email: Some("warren@example.com".to_string()),
            name: Some("Warren".to_string()),
            picture: None,
        };
        assert_eq!(profile.display_label(), "Warren");

        profile.name = None;
        assert_eq!(profile.display_label(), "warren@example.com");

        profile.email = None;
        assert_eq!(profile.display_label(), "42");
    }
}
