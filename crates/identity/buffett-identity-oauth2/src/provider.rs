//! Google sign-in: authorization link construction and callback completion.

use crate::client::{HttpTransport, OAuth2Client, PkceChallenge, ReqwestTransport};
use crate::config::{OAuth2Config, SigningSecretSource, resolve_redirect_uri};
use crate::error::{OAuth2Error, OAuth2Result};
use crate::state::{StatePayload, StateSigner};
use crate::types::{AuthorizationLink, SignIn};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Builds a [`GoogleAuthenticator`]; every missing prerequisite is reported
/// here rather than during a callback.
pub struct GoogleAuthenticatorBuilder {
    config: OAuth2Config,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl GoogleAuthenticatorBuilder {
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a `reqwest` transport with the configured timeout.
    pub fn default_transport(self) -> OAuth2Result<Self> {
        let timeout = Duration::from_secs(self.config.http_timeout_seconds);
        let transport = ReqwestTransport::new(timeout)?;
        Ok(self.transport(Arc::new(transport)))
    }

    pub fn build(self) -> OAuth2Result<GoogleAuthenticator> {
        self.config.validate()?;
        let redirect_uri = resolve_redirect_uri(self.config.redirect_uri.as_deref())?;
        let transport = self.transport.ok_or_else(|| {
            OAuth2Error::ConfigError("no HTTP transport configured".to_string())
        })?;

        let (secret, source) = self.config.signing_secret();
        if source == SigningSecretSource::ClientId {
            warn!(
                "No client secret or state secret configured; signing OAuth state with the client id. \
                 Set GOOGLE_CLIENT_SECRET for stronger state signing."
            );
        }
        let signer = StateSigner::new(secret);

        let client = OAuth2Client::new(transport, self.config.clone(), redirect_uri.clone());

        Ok(GoogleAuthenticator {
            config: self.config,
            redirect_uri,
            signer,
            client,
        })
    }
}

/// Issues authorization links and completes provider callbacks.
///
/// Holds no per-user state: everything needed to finish a sign-in travels in
/// the signed `state` parameter.
#[derive(Clone)]
pub struct GoogleAuthenticator {
    config: OAuth2Config,
    redirect_uri: String,
    signer: StateSigner,
    client: OAuth2Client,
}

impl GoogleAuthenticator {
    pub fn builder(config: OAuth2Config) -> GoogleAuthenticatorBuilder {
        GoogleAuthenticatorBuilder {
            config,
            transport: None,
        }
    }

    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn signer(&self) -> &StateSigner {
        &self.signer
    }

    pub fn authorization_link(&self) -> OAuth2Result<AuthorizationLink> {
        self.authorization_link_at(chrono::Utc::now().timestamp())
    }

    /// Generate a PKCE pair, sign a state carrying its verifier and build the
    /// provider URL.
    pub fn authorization_link_at(&self, now: i64) -> OAuth2Result<AuthorizationLink> {
        let pkce = PkceChallenge::new();
        let payload = StatePayload::new(
            self.config.app_tag.clone(),
            Some(pkce.code_verifier.clone()),
            now,
        );
        let state = self.signer.sign(&payload)?;

        let mut url = Url::parse(&self.config.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.config.client_id.trim())
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "true")
            .append_pair("prompt", "consent")
            .append_pair("code_challenge", &pkce.code_challenge)
            .append_pair("code_challenge_method", &pkce.code_challenge_method);

        debug!("Generated authorization URL for {}", self.config.app_tag);

        Ok(AuthorizationLink {
            url: url.to_string(),
            state,
            code_challenge: pkce.code_challenge,
        })
    }

    pub async fn complete(&self, code: &str, state: &str) -> OAuth2Result<SignIn> {
        self.complete_at(code, state, chrono::Utc::now().timestamp())
            .await
    }

    /// Verify `state`, exchange `code` with the embedded PKCE verifier and
    /// fetch the profile.
    pub async fn complete_at(&self, code: &str, state: &str, now: i64) -> OAuth2Result<SignIn> {
        let payload = self
            .signer
            .verify_at(state, self.config.state_ttl_seconds, now)
            .inspect_err(|e| warn!("Rejected OAuth state: {}", e))?;

        let tokens = self
            .client
            .exchange_code(code, payload.pkce.as_deref())
            .await?;
        let profile = self.client.get_user_info(&tokens.access_token).await?;

        info!(
            "Signed in {} via {}",
            profile.email.as_deref().unwrap_or(&profile.sub),
            self.config.app_tag
        );

        Ok(SignIn { tokens, profile })
    }
}
