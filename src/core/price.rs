//! Price resolution between registered assets.

use crate::core::amount::{WAD_DECIMALS, convert, mul_div, rescale, wad};
use crate::core::asset::Asset;
use crate::core::error::{FundError, FundResult};
use alloy_primitives::U256;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// A feed answer: quote units per whole base unit, with `decimals` places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedRate {
    pub answer: U256,
    pub decimals: u8,
}

impl FeedRate {
    pub fn new(answer: U256, decimals: u8) -> Self {
        Self { answer, decimals }
    }

    pub fn to_wad(self) -> FundResult<U256> {
        rescale(self.answer, self.decimals, WAD_DECIMALS)
    }
}

/// A directional price source for one `(base, quote)` pair.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn latest_rate(&self) -> anyhow::Result<FeedRate>;
}

/// Registry of directional feeds, resolving any pair directly, by inverting
/// the reverse feed, or by composing two legs through the pivot asset.
///
/// Resolved rates are always 18-decimal fixed point, independent of the
/// native decimals of either asset or of the feed.
pub struct PriceGraph {
    pivot: Asset,
    usd: Asset,
    feeds: RwLock<HashMap<(String, String), Arc<dyn PriceFeed>>>,
}

impl PriceGraph {
    pub fn new(pivot: Asset, usd: Asset) -> Self {
        Self {
            pivot,
            usd,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    pub fn pivot(&self) -> &Asset {
        &self.pivot
    }

    pub fn usd(&self) -> &Asset {
        &self.usd
    }

    /// Adds a directional feed. A pair can be registered only once.
    pub async fn register_feed(
        &self,
        base: &Asset,
        quote: &Asset,
        source: Arc<dyn PriceFeed>,
    ) -> FundResult<()> {
        let key = (base.symbol.clone(), quote.symbol.clone());
        let mut feeds = self.feeds.write().await;
        if feeds.contains_key(&key) {
            return Err(FundError::FeedAlreadyRegistered {
                base: base.symbol.clone(),
                quote: quote.symbol.clone(),
            });
        }
        debug!("Registered feed {}/{}", base, quote);
        feeds.insert(key, source);
        Ok(())
    }

    /// Rate of `base` in `quote`, as quote per whole base unit in wad.
    #[instrument(name = "GetPrice", skip_all, fields(base = %base, quote = %quote))]
    pub async fn get_price(&self, base: &Asset, quote: &Asset) -> FundResult<U256> {
        if base == quote {
            return Ok(wad());
        }
        if let Some(rate) = self.direct_or_reverse(base, quote).await? {
            return self.ensure_positive(rate, base, quote);
        }
        if base != &self.pivot && quote != &self.pivot {
            let first = self.direct_or_reverse(base, &self.pivot).await?;
            let second = self.direct_or_reverse(&self.pivot, quote).await?;
            if let (Some(first), Some(second)) = (first, second) {
                debug!("Composed {}/{} through {}", base, quote, self.pivot);
                return self.ensure_positive(mul_div(first, second, wad())?, base, quote);
            }
        }
        Err(FundError::NoFeed {
            base: base.symbol.clone(),
            quote: quote.symbol.clone(),
        })
    }

    /// Converts `amount` native units of `from` into native units of `to`.
    pub async fn convert_amount(&self, from: &Asset, to: &Asset, amount: U256) -> FundResult<U256> {
        if from == to {
            return Ok(amount);
        }
        let rate = self.get_price(from, to).await?;
        convert(amount, from.decimals, rate, to.decimals)
    }

    /// Values `amount` of `asset` in native units of the USD reference asset.
    pub async fn get_price_in_usd(&self, asset: &Asset, amount: U256) -> FundResult<U256> {
        self.convert_amount(asset, &self.usd, amount).await
    }

    /// Converts asset units into pivot units when `forward`, otherwise pivot
    /// units into asset units.
    pub async fn get_price_for_amount(
        &self,
        asset: &Asset,
        amount: U256,
        forward: bool,
    ) -> FundResult<U256> {
        if forward {
            self.convert_amount(asset, &self.pivot, amount).await
        } else {
            self.convert_amount(&self.pivot, asset, amount).await
        }
    }

    async fn lookup(&self, base: &Asset, quote: &Asset) -> Option<Arc<dyn PriceFeed>> {
        let feeds = self.feeds.read().await;
        feeds
            .get(&(base.symbol.clone(), quote.symbol.clone()))
            .cloned()
    }

    async fn direct_or_reverse(&self, base: &Asset, quote: &Asset) -> FundResult<Option<U256>> {
        if let Some(feed) = self.lookup(base, quote).await {
            return self.read_feed(feed.as_ref(), base, quote).await.map(Some);
        }
        if let Some(feed) = self.lookup(quote, base).await {
            let reverse = self.read_feed(feed.as_ref(), quote, base).await?;
            return mul_div(wad(), wad(), reverse).map(Some);
        }
        Ok(None)
    }

    async fn read_feed(&self, feed: &dyn PriceFeed, base: &Asset, quote: &Asset) -> FundResult<U256> {
        let rate = feed
            .latest_rate()
            .await
            .map_err(|source| FundError::Feed {
                base: base.symbol.clone(),
                quote: quote.symbol.clone(),
                source,
            })?;
        self.ensure_positive(rate.to_wad()?, base, quote)
    }

    fn ensure_positive(&self, rate: U256, base: &Asset, quote: &Asset) -> FundResult<U256> {
        if rate.is_zero() {
            return Err(FundError::InvalidPrice {
                base: base.symbol.clone(),
                quote: quote.symbol.clone(),
            });
        }
        Ok(rate)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::amount::pow10;
    use crate::providers::fixed_feed::FixedRateFeed;

    pub(crate) fn weth() -> Asset {
        Asset::new("WETH", 18)
    }

    pub(crate) fn usd() -> Asset {
        Asset::new("USD", 8)
    }

    pub(crate) fn eth() -> Asset {
        Asset::new("ETH", 18)
    }

    pub(crate) fn doge() -> Asset {
        Asset::new("DOGE", 8)
    }

    async fn graph() -> PriceGraph {
        let graph = PriceGraph::new(weth(), usd());
        let feed = |answer: u64, decimals: u8| -> Arc<dyn PriceFeed> {
            Arc::new(FixedRateFeed::new(U256::from(answer), decimals))
        };
        graph
            .register_feed(&weth(), &usd(), feed(2_000 * 100_000_000, 8))
            .await
            .unwrap();
        graph
            .register_feed(&eth(), &weth(), feed(1_000_000_000_000_000_000, 18))
            .await
            .unwrap();
        graph
            .register_feed(&doge(), &usd(), feed(10_000_000, 8))
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_direct_feed() {
        let graph = graph().await;
        let price = graph.get_price(&weth(), &usd()).await.unwrap();
        assert_eq!(price, U256::from(2_000u64) * wad());
    }

    #[tokio::test]
    async fn test_reverse_feed_is_inverted() {
        let graph = graph().await;
        let price = graph.get_price(&usd(), &weth()).await.unwrap();
        // 1 / 2000 in wad
        assert_eq!(price, pow10(18) / U256::from(2_000u64));
    }

    #[tokio::test]
    async fn test_composed_through_pivot() {
        let graph = graph().await;
        let price = graph.get_price(&eth(), &usd()).await.unwrap();
        assert_eq!(price, U256::from(2_000u64) * wad());

        let inverse = graph.get_price(&usd(), &eth()).await.unwrap();
        assert_eq!(inverse, pow10(18) / U256::from(2_000u64));
    }

    #[tokio::test]
    async fn test_same_asset_is_one() {
        let graph = graph().await;
        assert_eq!(graph.get_price(&doge(), &doge()).await.unwrap(), wad());
    }

    #[tokio::test]
    async fn test_unresolvable_pair_is_no_feed() {
        let graph = graph().await;
        let result = graph.get_price(&doge(), &weth()).await;
        assert!(matches!(result, Err(FundError::NoFeed { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let graph = graph().await;
        let result = graph
            .register_feed(
                &weth(),
                &usd(),
                Arc::new(FixedRateFeed::new(U256::from(1u64), 0)),
            )
            .await;
        assert!(matches!(result, Err(FundError::FeedAlreadyRegistered { .. })));
    }

    #[tokio::test]
    async fn test_zero_rate_is_invalid() {
        let graph = PriceGraph::new(weth(), usd());
        graph
            .register_feed(&eth(), &weth(), Arc::new(FixedRateFeed::new(U256::ZERO, 18)))
            .await
            .unwrap();
        let result = graph.get_price(&eth(), &weth()).await;
        assert!(matches!(result, Err(FundError::InvalidPrice { .. })));
    }

    #[tokio::test]
    async fn test_amount_conversions() {
        let graph = graph().await;
        let one_eth = pow10(18);

        let usd_value = graph.get_price_in_usd(&eth(), one_eth).await.unwrap();
        assert_eq!(usd_value, U256::from(2_000u64) * pow10(8));

        let pivot = graph.get_price_for_amount(&eth(), one_eth, true).await.unwrap();
        assert_eq!(pivot, one_eth);
        let back = graph.get_price_for_amount(&eth(), pivot, false).await.unwrap();
        assert_eq!(back, one_eth);
    }

    #[tokio::test]
    async fn test_round_trip_never_gains() {
        let graph = graph().await;
        let amount = pow10(18) + U256::from(7u64);
        let usd_value = graph.get_price_in_usd(&eth(), amount).await.unwrap();
        let back = graph.convert_amount(&usd(), &eth(), usd_value).await.unwrap();
        assert!(back <= amount);
    }
}
