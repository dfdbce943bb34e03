//! OAuth2 error types.

use crate::state::StateError;
use thiserror::Error;

pub type OAuth2Result<T> = Result<T, OAuth2Error>;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid state parameter: {0}")]
    InvalidState(#[from] StateError),

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("User info request failed: {0}")]
    UserInfoFailed(String),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("Invalid user info response: {0}")]
    InvalidUserInfoResponse(String),
}

/// Coarse classification used at the sign-in boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid client id / redirect URI / transport. Not retried.
    Configuration,
    /// Malformed, forged or expired state token.
    StateValidation,
    /// The provider rejected the code or the network failed.
    Exchange,
}

impl OAuth2Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OAuth2Error::ConfigError(_) | OAuth2Error::UrlError(_) => ErrorKind::Configuration,
            OAuth2Error::InvalidState(_) => ErrorKind::StateValidation,
            OAuth2Error::HttpError(_)
            | OAuth2Error::MissingAuthorizationCode
            | OAuth2Error::TokenExchangeFailed(_)
            | OAuth2Error::UserInfoFailed(_)
            | OAuth2Error::InvalidTokenResponse(_)
            | OAuth2Error::InvalidUserInfoResponse(_) => ErrorKind::Exchange,
        }
    }
}
