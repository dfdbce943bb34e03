//! OAuth2 configuration types.

use crate::error::{OAuth2Error, OAuth2Result};
use crate::state::DEFAULT_STATE_TTL_SECONDS;
use serde::{Deserialize, Serialize};
use url::Url;

pub const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Google OAuth2 client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Config {
    pub client_id: String,
    /// Optional: public clients rely on PKCE alone.
    pub client_secret: Option<String>,
    /// Exact callback URL registered with the provider. Required.
    pub redirect_uri: Option<String>,
    /// Dedicated key for signing the `state` parameter.
    pub state_secret: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub scopes: Vec<String>,
    /// Tag embedded in every state payload.
    pub app_tag: String,
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: None,
            state_secret: None,
            authorization_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: GOOGLE_USERINFO_ENDPOINT.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            app_tag: "buffett-analyzer".to_string(),
            state_ttl_seconds: DEFAULT_STATE_TTL_SECONDS,
            http_timeout_seconds: 10,
        }
    }
}

/// Which value ends up keying the state signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningSecretSource {
    StateSecret,
    ClientSecret,
    /// Client ids are often visible to browsers; signatures keyed on them are weak.
    ClientId,
}

impl OAuth2Config {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_state_secret(mut self, secret: impl Into<String>) -> Self {
        self.state_secret = Some(secret.into());
        self
    }

    pub fn with_endpoints(
        mut self,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        userinfo_endpoint: impl Into<String>,
    ) -> Self {
        self.authorization_endpoint = authorization_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self.userinfo_endpoint = userinfo_endpoint.into();
        self
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    /// The client secret, ignoring blank values.
    pub fn client_secret(&self) -> Option<&str> {
        non_blank(self.client_secret.as_deref())
    }

    /// Secret used to sign the `state` parameter and where it came from.
    pub fn signing_secret(&self) -> (&str, SigningSecretSource) {
        if let Some(secret) = non_blank(self.state_secret.as_deref()) {
            (secret, SigningSecretSource::StateSecret)
        } else if let Some(secret) = self.client_secret() {
            (secret, SigningSecretSource::ClientSecret)
        } else {
            (self.client_id.trim(), SigningSecretSource::ClientId)
        }
    }

    /// Check the values the flow cannot run without.
    pub fn validate(&self) -> OAuth2Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(OAuth2Error::ConfigError(
                "GOOGLE_CLIENT_ID is not set".to_string(),
            ));
        }
        resolve_redirect_uri(self.redirect_uri.as_deref())?;
        Url::parse(&self.authorization_endpoint)?;
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve the registered callback URL, dropping any query or fragment.
///
/// The value is never guessed: a missing redirect URI is a configuration
/// error that has to be fixed by the operator.
pub fn resolve_redirect_uri(configured: Option<&str>) -> OAuth2Result<String> {
    let raw = non_blank(configured).ok_or_else(|| {
        OAuth2Error::ConfigError(
            "GOOGLE_REDIRECT_URI is not set. Set it to the exact redirect URL registered \
             with the identity provider (including scheme and path)."
                .to_string(),
        )
    })?;

    let parsed = Url::parse(raw)?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(OAuth2Error::ConfigError(format!(
            "GOOGLE_REDIRECT_URI must be an absolute http(s) URL, got {raw}"
        )));
    }

    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    Ok(raw[..end].to_string())
}
