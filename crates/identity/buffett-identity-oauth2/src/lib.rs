//! Google OAuth2 sign-in with PKCE and stateless, signed `state` tokens.
//!
//! The authorization request carries an HMAC-signed, time-bound state token
//! that embeds the PKCE code verifier, so a sign-in survives the provider
//! redirect without any server-side storage. On return, the state is verified
//! in constant time, the code is exchanged for tokens and the user's profile
//! is fetched through an injected [`HttpTransport`].

mod client;
mod config;
mod error;
mod provider;
mod state;
mod types;


pub use client::{HttpReply, HttpTransport, OAuth2Client, PkceChallenge, ReqwestTransport};
pub use config::{
    GOOGLE_AUTH_ENDPOINT, GOOGLE_TOKEN_ENDPOINT, GOOGLE_USERINFO_ENDPOINT, OAuth2Config,
    SigningSecretSource, resolve_redirect_uri,
};
pub use error::{ErrorKind, OAuth2Error, OAuth2Result};
pub use provider::{GoogleAuthenticator, GoogleAuthenticatorBuilder};
pub use state::{DEFAULT_STATE_TTL_SECONDS, StateError, StatePayload, StateSigner};
pub use types::{AuthorizationLink, SignIn, TokenSet, UserProfile};
