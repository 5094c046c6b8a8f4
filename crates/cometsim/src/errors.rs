use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured error suitable for printing to a CLI consumer as JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Expected, recoverable ledger failures. None of these are fatal to the
/// process; callers translate them for display, the core supplies the kind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid amount: must be a positive, finite number")]
    InvalidAmount,

    #[error("insufficient wallet balance for {symbol}: have {available}, need {requested}")]
    InsufficientBalance {
        symbol: String,
        available: f64,
        requested: f64,
    },

    #[error("withdrawal exceeds supplied {symbol}: supplied {supplied}, requested {requested}")]
    InsufficientSuppliedBalance {
        symbol: String,
        supplied: f64,
        requested: f64,
    },

    #[error("unknown asset: {0}")]
    AssetNotFound(String),

    #[error("no outstanding borrow for {0}")]
    AssetNotBorrowed(String),

    #[error("borrow would exceed limit: projected {projected_value} against limit {borrow_limit}")]
    ExceedsBorrowLimit {
        projected_value: f64,
        borrow_limit: f64,
    },

    #[error(
        "withdrawal would leave the position at risk: borrowed {borrowed_value} against projected limit {projected_limit}"
    )]
    PositionAtRisk {
        borrowed_value: f64,
        projected_limit: f64,
    },

    #[error("ledger store busy")]
    StoreBusy,
}

impl LedgerError {
    /// Stable machine-readable code for the JSON boundary.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "invalid_amount",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InsufficientSuppliedBalance { .. } => "insufficient_supplied_balance",
            Self::AssetNotFound(_) => "asset_not_found",
            Self::AssetNotBorrowed(_) => "asset_not_borrowed",
            Self::ExceedsBorrowLimit { .. } => "exceeds_borrow_limit",
            Self::PositionAtRisk { .. } => "position_at_risk",
            Self::StoreBusy => "store_busy",
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        Self::new(e.code(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::InvalidAmount.code(), "invalid_amount");
        assert_eq!(
            LedgerError::AssetNotFound("XYZ".to_owned()).code(),
            "asset_not_found"
        );
        assert_eq!(LedgerError::StoreBusy.code(), "store_busy");
    }

    #[test]
    fn api_error_carries_prose() {
        let api: ApiError = LedgerError::AssetNotBorrowed("WETH".to_owned()).into();
        assert_eq!(api.code, "asset_not_borrowed");
        assert!(api.message.contains("WETH"), "message: {}", api.message);
    }
}
