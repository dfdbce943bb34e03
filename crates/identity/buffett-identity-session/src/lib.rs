//! Sign-in session context for one user's interaction.
//!
//! An [`AuthSession`] is passed explicitly into each handler instead of living
//! in ambient global state. It moves through three states:
//!
//! ```text
//! Anonymous --begin_sign_in--> Pending --callback ok--> Authenticated
//!     ^                           |                          |
//!     +------- callback failed ---+                          |
//!     +---------------------- logout ------------------------+
//! ```
//!
//! A failed callback never leaves partial credentials behind.

mod params;
mod registry;

pub use params::CallbackParams;
pub use registry::{
    DEFAULT_MAX_PENDING, DEFAULT_PENDING_TTL_SECONDS, DEFAULT_SESSION_TTL_SECONDS, RegistryLimits,
    SessionRegistry,
};

use buffett_identity_oauth2::{
    AuthorizationLink, ErrorKind, GoogleAuthenticator, OAuth2Error, OAuth2Result, TokenSet,
    UserProfile,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Message shown for every state validation failure; the cause is not exposed.
pub const STATE_MISMATCH_MESSAGE: &str = "OAuth state mismatch. Please try again.";

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("No OAuth callback parameters present")]
    NoCallback,

    #[error("Sign-in was not completed: {0}")]
    ProviderDenied(String),

    #[error("{STATE_MISMATCH_MESSAGE}")]
    StateMismatch,

    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("OAuth configuration error: {0}")]
    Configuration(String),
}

impl From<OAuth2Error> for SignInError {
    fn from(error: OAuth2Error) -> Self {
        match error.kind() {
            ErrorKind::StateValidation => SignInError::StateMismatch,
            ErrorKind::Configuration => SignInError::Configuration(error.to_string()),
            ErrorKind::Exchange => match error {
                OAuth2Error::TokenExchangeFailed(body) | OAuth2Error::UserInfoFailed(body) => {
                    SignInError::Exchange(body)
                }
                other => SignInError::Exchange(other.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum AuthState {
    Anonymous,
    /// An authorization link was issued and the provider redirect is awaited.
    Pending { issued_at: DateTime<Utc> },
    Authenticated {
        tokens: TokenSet,
        profile: UserProfile,
        signed_in_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    id: String,
    state: AuthState,
    created_at: DateTime<Utc>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: AuthState::Anonymous,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, AuthState::Pending { .. })
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        match &self.state {
            AuthState::Authenticated { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn tokens(&self) -> Option<&TokenSet> {
        match &self.state {
            AuthState::Authenticated { tokens, .. } => Some(tokens),
            _ => None,
        }
    }

    /// Issue an authorization link. An already signed-in session stays signed in.
    pub fn begin_sign_in(
        &mut self,
        authenticator: &GoogleAuthenticator,
    ) -> OAuth2Result<AuthorizationLink> {
        let link = authenticator.authorization_link()?;
        if !self.is_authenticated() {
            self.state = AuthState::Pending {
                issued_at: Utc::now(),
            };
        }
        Ok(link)
    }

    pub async fn complete_sign_in(
        &mut self,
        authenticator: &GoogleAuthenticator,
        params: &mut CallbackParams,
    ) -> Result<UserProfile, SignInError> {
        self.complete_sign_in_at(authenticator, params, Utc::now())
            .await
    }

    /// Process a provider redirect.
    ///
    /// The callback does not have to arrive at a `Pending` session: the signed
    /// state carries everything needed, so a fresh session can finish a
    /// sign-in started elsewhere. On success the tokens and profile are
    /// stored and the callback parameters are cleared; on failure the session
    /// keeps any earlier sign-in and otherwise returns to `Anonymous`.
    pub async fn complete_sign_in_at(
        &mut self,
        authenticator: &GoogleAuthenticator,
        params: &mut CallbackParams,
        now: DateTime<Utc>,
    ) -> Result<UserProfile, SignInError> {
        if let Some(error) = params.error() {
            let reason = match params.error_description() {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            warn!("Provider returned an error on callback: {}", reason);
            self.abandon_pending();
            return Err(SignInError::ProviderDenied(reason));
        }

        let (code, state) = match (params.code(), params.state()) {
            (Some(code), Some(state)) => (code.to_string(), state.to_string()),
            _ => return Err(SignInError::NoCallback),
        };

        let sign_in = match authenticator
            .complete_at(&code, &state, now.timestamp())
            .await
        {
            Ok(sign_in) => sign_in,
            Err(e) => {
                self.abandon_pending();
                return Err(e.into());
            }
        };

        let profile = sign_in.profile.clone();
        self.state = AuthState::Authenticated {
            tokens: sign_in.tokens,
            profile: sign_in.profile,
            signed_in_at: now,
        };
        params.clear_oauth_params();

        info!("Session {} signed in as {}", self.id, profile.display_label());
        Ok(profile)
    }

    /// Forget tokens and profile and clear any callback parameters.
    pub fn logout(&mut self, params: &mut CallbackParams) {
        if self.is_authenticated() {
            info!("Session {} signed out", self.id);
        }
        self.state = AuthState::Anonymous;
        params.clear_oauth_params();
    }

    /// Drop an unfinished sign-in; a signed-in session is left alone.
    pub fn abandon_pending(&mut self) {
        if self.is_pending() {
            self.state = AuthState::Anonymous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use buffett_identity_oauth2::{HttpReply, HttpTransport, OAuth2Config, StatePayload, StateSigner};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        token_status: u16,
        token_body: String,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn ok() -> Self {
            Self {
                token_status: 200,
                token_body: serde_json::json!({
                    "access_token": "at",
                    "refresh_token": "rt",
                    "expires_in": 3600
                })
                .to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn rejecting() -> Self {
            Self {
                token_status: 400,
                token_body: r#"{"error":"invalid_grant"}"#.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post_form(&self, _url: &str, _form: &[(&str, &str)]) -> OAuth2Result<HttpReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpReply {
                status: self.token_status,
                body: self.token_body.clone(),
            })
        }

        async fn get_with_bearer(&self, _url: &str, _token: &str) -> OAuth2Result<HttpReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpReply {
                status: 200,
                body: serde_json::json!({
                    "sub": "1001",
                    "email": "warren@example.com",
                    "name": "Warren",
                    "picture": "https://example.com/w.png"
                })
                .to_string(),
            })
        }
    }

    fn authenticator(transport: Arc<ScriptedTransport>) -> GoogleAuthenticator {
        let config = OAuth2Config::new("cid")
            .with_client_secret("csec")
            .with_redirect_uri("http://localhost:8501/");
        GoogleAuthenticator::builder(config)
            .transport(transport)
            .build()
            .unwrap()
    }

    fn callback_for(link: &AuthorizationLink) -> CallbackParams {
        let mut params = CallbackParams::new();
        params.insert("code", "4/0Ab");
        params.insert("state", link.state.clone());
        params.insert("scope", "email profile openid");
        params.insert("authuser", "0");
        params.insert("prompt", "consent");
        params.insert("tab", "valuation");
        params
    }

    #[tokio::test]
    async fn test_successful_sign_in_lifecycle() {
        let transport = Arc::new(ScriptedTransport::ok());
        let auth = authenticator(transport.clone());
        let mut session = AuthSession::new();
        assert!(matches!(session.state(), AuthState::Anonymous));

        let link = session.begin_sign_in(&auth).unwrap();
        assert!(session.is_pending());

        let mut params = callback_for(&link);
        let profile = session.complete_sign_in(&auth, &mut params).await.unwrap();

        assert_eq!(profile.email.as_deref(), Some("warren@example.com"));
        assert!(session.is_authenticated());
        assert_eq!(session.tokens().unwrap().refresh_token.as_deref(), Some("rt"));
        assert_eq!(session.current_user().unwrap().sub, "1001");
        assert_eq!(params.to_query_string(), "tab=valuation");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        session.logout(&mut params);
        assert!(matches!(session.state(), AuthState::Anonymous));
        assert!(session.current_user().is_none());
        assert!(session.tokens().is_none());
    }

    #[tokio::test]
    async fn test_callback_completes_on_fresh_session() {
        let auth = authenticator(Arc::new(ScriptedTransport::ok()));
        let link = AuthSession::new().begin_sign_in(&auth).unwrap();

        let mut other = AuthSession::new();
        let mut params = callback_for(&link);
        other.complete_sign_in(&auth, &mut params).await.unwrap();
        assert!(other.is_authenticated());
    }

    #[tokio::test]
    async fn test_invalid_state_returns_to_anonymous() {
        let transport = Arc::new(ScriptedTransport::ok());
        let auth = authenticator(transport.clone());
        let mut session = AuthSession::new();
        session.begin_sign_in(&auth).unwrap();

        let forged = StateSigner::new("wrong")
            .sign(&StatePayload::new("buffett-analyzer", None, Utc::now().timestamp()))
            .unwrap();
        let mut params = CallbackParams::new();
        params.insert("code", "4/0Ab");
        params.insert("state", forged);

        let err = session
            .complete_sign_in(&auth, &mut params)
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::StateMismatch));
        assert_eq!(err.to_string(), STATE_MISMATCH_MESSAGE);
        assert!(matches!(session.state(), AuthState::Anonymous));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_state_is_reported_as_mismatch() {
        let auth = authenticator(Arc::new(ScriptedTransport::ok()));
        let mut session = AuthSession::new();
        let link = session.begin_sign_in(&auth).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(601);
        let mut params = callback_for(&link);
        let err = session
            .complete_sign_in_at(&auth, &mut params, later)
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::StateMismatch));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_exchange_failure_keeps_existing_sign_in() {
        let good = authenticator(Arc::new(ScriptedTransport::ok()));
        let bad = authenticator(Arc::new(ScriptedTransport::rejecting()));
        let mut session = AuthSession::new();

        let link = session.begin_sign_in(&good).unwrap();
        session
            .complete_sign_in(&good, &mut callback_for(&link))
            .await
            .unwrap();

        let link = session.begin_sign_in(&bad).unwrap();
        assert!(session.is_authenticated());

        let mut params = callback_for(&link);
        let err = session
            .complete_sign_in(&bad, &mut params)
            .await
            .unwrap_err();
        match err {
            SignInError::Exchange(body) => assert!(body.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.current_user().unwrap().sub, "1001");
        assert_eq!(params.code(), Some("4/0Ab"));
    }

    #[tokio::test]
    async fn test_exchange_failure_from_pending_leaves_no_credentials() {
        let auth = authenticator(Arc::new(ScriptedTransport::rejecting()));
        let mut session = AuthSession::new();
        let link = session.begin_sign_in(&auth).unwrap();

        let result = session.complete_sign_in(&auth, &mut callback_for(&link)).await;
        assert!(result.is_err());
        assert!(matches!(session.state(), AuthState::Anonymous));
        assert!(session.tokens().is_none());
    }

    #[tokio::test]
    async fn test_provider_denial() {
        let transport = Arc::new(ScriptedTransport::ok());
        let auth = authenticator(transport.clone());
        let mut session = AuthSession::new();
        session.begin_sign_in(&auth).unwrap();

        let mut params = CallbackParams::from_query("error=access_denied");
        let err = session
            .complete_sign_in(&auth, &mut params)
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::ProviderDenied(reason) if reason == "access_denied"));
        assert!(matches!(session.state(), AuthState::Anonymous));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_callback_params() {
        let auth = authenticator(Arc::new(ScriptedTransport::ok()));
        let mut session = AuthSession::new();
        session.begin_sign_in(&auth).unwrap();

        let mut params = CallbackParams::from_query("ticker=KO");
        let err = session
            .complete_sign_in(&auth, &mut params)
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::NoCallback));
        assert!(session.is_pending());
    }
}
