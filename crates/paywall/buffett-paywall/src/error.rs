use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaywallError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Unknown subscription tier: {0}")]
    UnknownTier(String),

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Invalid account identifier")]
    InvalidEmail,

    #[error("Account store error: {0}")]
    Store(String),

    #[error("Account database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type PaywallResult<T> = Result<T, PaywallError>;
