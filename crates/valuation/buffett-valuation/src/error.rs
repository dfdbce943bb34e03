use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValuationError {
    #[error("At least one year of financials is required")]
    EmptyHistory,

    #[error("Price at index {0} must be positive and finite")]
    InvalidPrice(usize),
}

pub type ValuationResult<T> = Result<T, ValuationError>;
