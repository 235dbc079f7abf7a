//! Error kinds surfaced by fund operations.

use thiserror::Error;

/// Result alias for fund operations.
pub type FundResult<T> = std::result::Result<T, FundError>;

/// Every way a fund operation can abort.
///
/// A returned error always means the operation left balances, weights and
/// supply exactly as they were before the call.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FundError {
    #[error("No price feed path from {base} to {quote}")]
    NoFeed { base: String, quote: String },

    #[error("Feed for {base}/{quote} is already registered")]
    FeedAlreadyRegistered { base: String, quote: String },

    #[error("Feed for {base}/{quote} returned a zero rate")]
    InvalidPrice { base: String, quote: String },

    #[error("Feed for {base}/{quote} failed: {source}")]
    Feed {
        base: String,
        quote: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Weights sum to {sum} bps, expected 10000")]
    InvalidWeights { sum: u64 },

    #[error("Invalid constituents: {0}")]
    InvalidConstituents(String),

    #[error("The fund is paused")]
    Paused,

    #[error("Cooldown active: {remaining_secs}s left before the fund can be unpaused")]
    CooldownActive { remaining_secs: i64 },

    #[error("Wrong investment amount: {0}")]
    WrongInvestmentAmount(String),

    #[error("Balance cannot be below minimum investment amount")]
    BelowMinimumInvestment,

    #[error("Caller is not holding given share amount")]
    NotHoldingAmount,

    #[error("Caller {0} is not the rebalancer")]
    NotRebalancer(String),

    #[error("Caller {0} lacks the required authority")]
    Unauthorized(String),

    #[error("Fee has already been charged after the last rebalance")]
    AlreadyCharged,

    #[error("Slippage exceeded selling {sell} for {buy}: got {received}, minimum {minimum}")]
    SlippageExceeded {
        sell: String,
        buy: String,
        received: String,
        minimum: String,
    },

    #[error("Slippage of {0} bps is out of range")]
    InvalidSlippage(u64),

    #[error("Amount must be nonzero")]
    InvalidAmount,

    #[error("Fund has shares outstanding but zero valuation")]
    ZeroValuation,

    #[error("Insufficient {asset} balance: need {required}, have {available}")]
    InsufficientBalance {
        asset: String,
        required: String,
        available: String,
    },

    #[error("Fee reserve asset {0} is not a current constituent")]
    ReserveNotHeld(String),

    #[error("Another operation is already in progress on this fund")]
    ReentrantCall,

    #[error("Arithmetic overflow or division by zero")]
    Overflow,

    #[error("Swap of {sell} for {buy} failed: {source}")]
    Swap {
        sell: String,
        buy: String,
        #[source]
        source: anyhow::Error,
    },
}

impl FundError {
    /// Returns true when the error came from an external collaborator rather
    /// than a validation rule.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Feed { .. } | Self::Swap { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_stable() {
        assert_eq!(
            FundError::InvalidWeights { sum: 9999 }.to_string(),
            "Weights sum to 9999 bps, expected 10000"
        );
        assert_eq!(FundError::Paused.to_string(), "The fund is paused");
        assert_eq!(
            FundError::AlreadyCharged.to_string(),
            "Fee has already been charged after the last rebalance"
        );
    }

    #[test]
    fn test_external_classification() {
        let err = FundError::Swap {
            sell: "ETH".into(),
            buy: "WETH".into(),
            source: anyhow::anyhow!("venue down"),
        };
        assert!(err.is_external());
        assert!(!FundError::Paused.is_external());
    }
}
