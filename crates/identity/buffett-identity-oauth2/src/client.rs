//! OAuth2 client: PKCE generation, HTTP transport and the two provider calls.

use crate::config::OAuth2Config;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::types::{TokenSet, UserProfile};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, thread_rng};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    /// Generate a new S256 pair from 32 random bytes.
    pub fn new() -> Self {
        Self::from_verifier(Self::generate_code_verifier())
    }

    pub fn from_verifier(code_verifier: String) -> Self {
        let code_challenge = Self::generate_code_challenge(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: "S256".to_string(),
        }
    }

    fn generate_code_verifier() -> String {
        let mut bytes = [0u8; 32];
        thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn generate_code_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Raw HTTP response handed back by a transport.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP capability used for the token exchange and profile fetch.
///
/// Injected at construction time so the flow never discovers a missing
/// client halfway through a callback.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST an `application/x-www-form-urlencoded` body.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> OAuth2Result<HttpReply>;

    /// GET with an `Authorization: Bearer` header.
    async fn get_with_bearer(&self, url: &str, access_token: &str) -> OAuth2Result<HttpReply>;
}

/// `reqwest`-backed transport with a fixed request timeout and no retries.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> OAuth2Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuth2Error::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> OAuth2Result<HttpReply> {
        let response = self.http_client.post(url).form(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }

    async fn get_with_bearer(&self, url: &str, access_token: &str) -> OAuth2Result<HttpReply> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

/// Talks to the provider's token and userinfo endpoints.
#[derive(Clone)]
pub struct OAuth2Client {
    transport: Arc<dyn HttpTransport>,
    config: OAuth2Config,
    redirect_uri: String,
}

impl OAuth2Client {
    pub fn new(transport: Arc<dyn HttpTransport>, config: OAuth2Config, redirect_uri: String) -> Self {
        Self {
            transport,
            config,
            redirect_uri,
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Sends the PKCE verifier and the client secret when each is available,
    /// so both public and confidential clients work.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> OAuth2Result<TokenSet> {
        if code.trim().is_empty() {
            return Err(OAuth2Error::MissingAuthorizationCode);
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("code", code),
            ("client_id", self.config.client_id.trim()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        if let Some(secret) = self.config.client_secret() {
            form.push(("client_secret", secret));
        }

        let reply = self
            .transport
            .post_form(&self.config.token_endpoint, &form)
            .await?;

        if !reply.is_success() {
            error!("Token exchange failed ({}): {}", reply.status, reply.body);
            return Err(OAuth2Error::TokenExchangeFailed(reply.body));
        }

        let tokens: TokenSet = serde_json::from_str(&reply.body)
            .map_err(|e| OAuth2Error::InvalidTokenResponse(e.to_string()))?;
        if tokens.access_token.is_empty() {
            return Err(OAuth2Error::InvalidTokenResponse(
                "response carried an empty access_token".to_string(),
            ));
        }

        info!("Successfully exchanged code for tokens");
        Ok(tokens)
    }

    /// Get user info using access token
    pub async fn get_user_info(&self, access_token: &str) -> OAuth2Result<UserProfile> {
        let reply = self
            .transport
            .get_with_bearer(&self.config.userinfo_endpoint, access_token)
            .await?;

        if !reply.is_success() {
            error!("User info request failed ({}): {}", reply.status, reply.body);
            return Err(OAuth2Error::UserInfoFailed(reply.body));
        }

        let profile: UserProfile = serde_json::from_str(&reply.body)
            .map_err(|e| OAuth2Error::InvalidUserInfoResponse(e.to_string()))?;

        debug!("Retrieved user info for subject: {}", profile.sub);
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_pkce_generation() {
        let pkce1 = PkceChallenge::new();
        let pkce2 = PkceChallenge::new();

        assert_ne!(pkce1.code_verifier, pkce2.code_verifier);
        assert_ne!(pkce1.code_challenge, pkce2.code_challenge);
        assert_eq!(pkce1.code_challenge_method, "S256");

        // 32 bytes encode to 43 unpadded base64url characters
        assert_eq!(pkce1.code_verifier.len(), 43);
        assert!(!pkce1.code_verifier.contains('='));

        let expected = PkceChallenge::generate_code_challenge(&pkce1.code_verifier);
        assert_eq!(pkce1.code_challenge, expected);
    }

    #[test]
    fn test_pkce_known_challenge() {
        let pkce = PkceChallenge::from_verifier(
            "dBjftJeZ4CVP-mJ92K1ai0kKzTlHwYCAyAgeXZR-9yc".to_string(),
        );
        assert_eq!(
            pkce.code_challenge,
            "0VzWcS0lif1ZY34n5q3F_Jdnghn4QJ4-70acfFV3o5s"
        );
    }

    /// Records requests and replays canned responses.
    struct FakeTransport {
        token_reply: HttpReply,
        userinfo_reply: HttpReply,
        forms: Mutex<Vec<Vec<(String, String)>>>,
        bearer_tokens: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(token_reply: HttpReply, userinfo_reply: HttpReply) -> Self {
            Self {
                token_reply,
                userinfo_reply,
                forms: Mutex::new(Vec::new()),
                bearer_tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn post_form(&self, _url: &str, form: &[(&str, &str)]) -> OAuth2Result<HttpReply> {
            self.forms.lock().unwrap().push(
                form.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            Ok(self.token_reply.clone())
        }

        async fn get_with_bearer(&self, _url: &str, access_token: &str) -> OAuth2Result<HttpReply> {
            self.bearer_tokens
                .lock()
                .unwrap()
                .push(access_token.to_string());
            Ok(self.userinfo_reply.clone())
        }
    }

    fn ok(body: &str) -> HttpReply {
        HttpReply {
            status: 200,
            body: body.to_string(),
        }
    }

    fn client_with(transport: Arc<FakeTransport>, config: OAuth2Config) -> OAuth2Client {
        OAuth2Client::new(transport, config, "http://localhost:8501/".to_string())
    }

    #[tokio::test]
    async fn test_public_client_form_omits_secret() {
        let transport = Arc::new(FakeTransport::new(
            ok(r#"{"access_token":"at"}"#),
            ok(r#"{"sub":"1"}"#),
        ));
        let client = client_with(transport.clone(), OAuth2Config::new("cid"));

        client.exchange_code("the-code", Some("the-verifier")).await.unwrap();

        let forms = transport.forms.lock().unwrap();
        let form = &forms[0];
        assert!(form.contains(&("code".to_string(), "the-code".to_string())));
        assert!(form.contains(&("client_id".to_string(), "cid".to_string())));
        assert!(form.contains(&(
            "redirect_uri".to_string(),
            "http://localhost:8501/".to_string()
        )));
        assert!(form.contains(&(
            "grant_type".to_string(),
            "authorization_code".to_string()
        )));
        assert!(form.contains(&("code_verifier".to_string(), "the-verifier".to_string())));
        assert!(!form.iter().any(|(k, _)| k == "client_secret"));
    }

    #[tokio::test]
    async fn test_confidential_client_without_verifier() {
        let transport = Arc::new(FakeTransport::new(
            ok(r#"{"access_token":"at"}"#),
            ok(r#"{"sub":"1"}"#),
        ));
        let config = OAuth2Config::new("cid").with_client_secret("csec");
        let client = client_with(transport.clone(), config);

        client.exchange_code("the-code", None).await.unwrap();

        let forms = transport.forms.lock().unwrap();
        let form = &forms[0];
        assert!(form.contains(&("client_secret".to_string(), "csec".to_string())));
        assert!(!form.iter().any(|(k, _)| k == "code_verifier"));
    }

    #[tokio::test]
    async fn test_exchange_failure_carries_provider_body() {
        let transport = Arc::new(FakeTransport::new(
            HttpReply {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            },
            ok(r#"{"sub":"1"}"#),
        ));
        let client = client_with(transport, OAuth2Config::new("cid"));

        let err = client.exchange_code("stale", None).await.unwrap_err();
        match err {
            OAuth2Error::TokenExchangeFailed(body) => assert!(body.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_access_token_rejected() {
        let transport = Arc::new(FakeTransport::new(
            ok(r#"{"access_token":""}"#),
            ok(r#"{"sub":"1"}"#),
        ));
        let client = client_with(transport, OAuth2Config::new("cid"));

        let err = client.exchange_code("code", None).await.unwrap_err();
        assert!(matches!(err, OAuth2Error::InvalidTokenResponse(_)));
    }

    #[tokio::test]
    async fn test_blank_code_rejected_without_request() {
        let transport = Arc::new(FakeTransport::new(
            ok(r#"{"access_token":"at"}"#),
            ok(r#"{"sub":"1"}"#),
        ));
        let client = client_with(transport.clone(), OAuth2Config::new("cid"));

        let err = client.exchange_code("  ", None).await.unwrap_err();
        assert!(matches!(err, OAuth2Error::MissingAuthorizationCode));
        assert!(transport.forms.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_info_uses_bearer_token() {
        let transport = Arc::new(FakeTransport::new(
            ok(r#"{"access_token":"at"}"#),
            ok(r#"{"sub":"42","email":"w@example.com","name":"W"}"#),
        ));
        let client = client_with(transport.clone(), OAuth2Config::new("cid"));

        let profile = client.get_user_info("at").await.unwrap();
        assert_eq!(profile.sub, "42");
        assert_eq!(profile.email.as_deref(), Some("w@example.com"));
        assert_eq!(transport.bearer_tokens.lock().unwrap().as_slice(), ["at"]);
    }

    #[tokio::test]
    async fn test_user_info_failure() {
        let transport = Arc::new(FakeTransport::new(
            ok(r#"{"access_token":"at"}"#),
            HttpReply {
                status: 401,
                body: "unauthorized".to_string(),
            },
        ));
        let client = client_with(transport, OAuth2Config::new("cid"));

        let err = client.get_user_info("revoked").await.unwrap_err();
        assert!(matches!(err, OAuth2Error::UserInfoFailed(body) if body == "unauthorized"));
    }
}
