use crate::core::amount::parse_units;
use crate::core::price::{FeedRate, PriceFeed};
use alloy_primitives::U256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Decimals used for rates parsed from text.
const TEXT_RATE_DECIMALS: u8 = 18;

/// In-memory feed whose answer is set by hand.
#[derive(Debug)]
pub struct FixedRateFeed {
    rate: Mutex<FeedRate>,
}

impl FixedRateFeed {
    pub fn new(answer: U256, decimals: u8) -> Self {
        FixedRateFeed {
            rate: Mutex::new(FeedRate::new(answer, decimals)),
        }
    }

    /// Builds a feed from a decimal string such as `"2000.5"`.
    pub fn from_decimal(rate: &str) -> Result<Self> {
        let value =
            Decimal::from_str(rate).with_context(|| format!("Invalid rate: {rate}"))?;
        let answer = parse_units(value, TEXT_RATE_DECIMALS)
            .with_context(|| format!("Rate {rate} cannot be represented"))?;
        Ok(Self::new(answer, TEXT_RATE_DECIMALS))
    }

    pub fn set_answer(&self, answer: U256, decimals: u8) {
        let mut rate = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Feed answer moved from {} to {}", rate.answer, answer);
        *rate = FeedRate::new(answer, decimals);
    }
}

#[async_trait]
impl PriceFeed for FixedRateFeed {
    async fn latest_rate(&self) -> Result<FeedRate> {
        Ok(*self.rate.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::wad;

    #[tokio::test]
    async fn test_from_decimal() {
        let feed = FixedRateFeed::from_decimal("2.5").unwrap();
        let rate = feed.latest_rate().await.unwrap();
        assert_eq!(rate.to_wad().unwrap(), wad() * U256::from(5u64) / U256::from(2u64));
    }

    #[test]
    fn test_from_decimal_rejects_garbage() {
        assert!(FixedRateFeed::from_decimal("abc").is_err());
        assert!(FixedRateFeed::from_decimal("-1").is_err());
    }

    #[tokio::test]
    async fn test_set_answer() {
        let feed = FixedRateFeed::new(U256::from(1u64), 0);
        feed.set_answer(U256::from(300u64), 2);
        let rate = feed.latest_rate().await.unwrap();
        assert_eq!(rate, FeedRate::new(U256::from(300u64), 2));
        assert_eq!(rate.to_wad().unwrap(), U256::from(3u64) * wad());
    }
}
