//! Trade execution seam and the staged batch that makes multi-leg
//! operations all-or-nothing.

use crate::core::amount::{checked_add, min_out_after_slippage};
use crate::core::asset::Asset;
use crate::core::error::{FundError, FundResult};
use crate::core::ledger::Constituent;
use crate::core::price::PriceGraph;
use alloy_primitives::U256;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// One trade request sent to the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOrder {
    pub sell: Asset,
    pub buy: Asset,
    pub amount_in: U256,
    pub min_amount_out: U256,
}

/// What the venue reports back for a filled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub amount_out: U256,
}

/// External trade venue (an AMM router, a lending-market wrapper, ...).
#[async_trait]
pub trait SwapAdapter: Send + Sync {
    async fn swap(&self, order: &SwapOrder) -> anyhow::Result<Fill>;
}

/// Sells `amount_in` of `sell` for `buy`, bounded by `slippage_bps` against
/// the price graph's expected output. Returns the amount received.
///
/// Same-asset legs and zero amounts settle without touching the venue.
pub async fn execute_leg(
    graph: &PriceGraph,
    adapter: &dyn SwapAdapter,
    sell: &Asset,
    buy: &Asset,
    amount_in: U256,
    slippage_bps: u64,
) -> FundResult<U256> {
    if sell == buy || amount_in.is_zero() {
        return Ok(amount_in);
    }
    let expected = graph.convert_amount(sell, buy, amount_in).await?;
    let min_amount_out = min_out_after_slippage(expected, slippage_bps)?;
    let order = SwapOrder {
        sell: sell.clone(),
        buy: buy.clone(),
        amount_in,
        min_amount_out,
    };

    let fill = adapter
        .swap(&order)
        .await
        .map_err(|source| FundError::Swap {
            sell: sell.symbol.clone(),
            buy: buy.symbol.clone(),
            source,
        })?;

    // The venue's own bound is not trusted
    if fill.amount_out < min_amount_out {
        return Err(FundError::SlippageExceeded {
            sell: sell.symbol.clone(),
            buy: buy.symbol.clone(),
            received: fill.amount_out.to_string(),
            minimum: min_amount_out.to_string(),
        });
    }
    debug!(
        "Swapped {} {} for {} {} (expected {})",
        amount_in, sell, fill.amount_out, buy, expected
    );
    Ok(fill.amount_out)
}

/// Per-asset credits and debits collected while an operation runs its legs,
/// applied to the constituent balances only once every leg has succeeded.
#[derive(Debug, Default)]
pub struct StagedBatch {
    credits: HashMap<Asset, U256>,
    debits: HashMap<Asset, U256>,
}

impl StagedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, asset: &Asset, amount: U256) -> FundResult<()> {
        let entry = self.credits.entry(asset.clone()).or_insert(U256::ZERO);
        *entry = checked_add(*entry, amount)?;
        Ok(())
    }

    pub fn debit(&mut self, asset: &Asset, amount: U256) -> FundResult<()> {
        let entry = self.debits.entry(asset.clone()).or_insert(U256::ZERO);
        *entry = checked_add(*entry, amount)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty() && self.debits.is_empty()
    }

    /// Applies every delta, or none of them if any would leave a negative
    /// balance or touches an asset that is not held.
    pub fn apply(self, constituents: &mut [Constituent]) -> FundResult<()> {
        for asset in self.credits.keys().chain(self.debits.keys()) {
            if !constituents.iter().any(|c| &c.asset == asset) {
                return Err(FundError::InvalidConstituents(format!(
                    "{asset} is not held by the fund"
                )));
            }
        }

        let mut updated = Vec::with_capacity(constituents.len());
        for constituent in constituents.iter() {
            let credit = self.credits.get(&constituent.asset).copied().unwrap_or_default();
            let debit = self.debits.get(&constituent.asset).copied().unwrap_or_default();
            let gross = checked_add(constituent.balance, credit)?;
            let balance = gross
                .checked_sub(debit)
                .ok_or_else(|| FundError::InsufficientBalance {
                    asset: constituent.asset.symbol.clone(),
                    required: debit.to_string(),
                    available: gross.to_string(),
                })?;
            updated.push(balance);
        }

        for (constituent, balance) in constituents.iter_mut().zip(updated) {
            constituent.balance = balance;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::price::tests::{eth, usd, weth};
    use crate::providers::fixed_feed::FixedRateFeed;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ShortchangingVenue {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SwapAdapter for ShortchangingVenue {
        async fn swap(&self, order: &SwapOrder) -> anyhow::Result<Fill> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Fill {
                amount_out: order.min_amount_out - U256::from(1u64),
            })
        }
    }

    struct BrokenVenue;

    #[async_trait]
    impl SwapAdapter for BrokenVenue {
        async fn swap(&self, _order: &SwapOrder) -> anyhow::Result<Fill> {
            Err(anyhow::anyhow!("pool drained"))
        }
    }

    async fn graph() -> PriceGraph {
        let graph = PriceGraph::new(weth(), usd());
        graph
            .register_feed(
                &eth(),
                &weth(),
                Arc::new(FixedRateFeed::new(U256::from(2u64), 0)),
            )
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_fill_below_minimum_is_rejected() {
        let graph = graph().await;
        let venue = ShortchangingVenue {
            calls: AtomicUsize::new(0),
        };
        let result = execute_leg(&graph, &venue, &eth(), &weth(), U256::from(1_000u64), 100).await;
        assert!(matches!(result, Err(FundError::SlippageExceeded { .. })));
        assert_eq!(venue.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_asset_leg_skips_venue() {
        let graph = graph().await;
        let venue = ShortchangingVenue {
            calls: AtomicUsize::new(0),
        };
        let out = execute_leg(&graph, &venue, &weth(), &weth(), U256::from(5u64), 0)
            .await
            .unwrap();
        assert_eq!(out, U256::from(5u64));
        assert_eq!(venue.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_venue_failure_is_wrapped() {
        let graph = graph().await;
        let result = execute_leg(&graph, &BrokenVenue, &eth(), &weth(), U256::from(1u64), 0).await;
        match result {
            Err(FundError::Swap { sell, source, .. }) => {
                assert_eq!(sell, "ETH");
                assert_eq!(source.to_string(), "pool drained");
            }
            other => panic!("Expected swap error, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_applies_all_or_nothing() {
        let mut constituents = vec![
            Constituent::new(eth(), 5_000, U256::from(100u64)),
            Constituent::new(weth(), 5_000, U256::from(10u64)),
        ];

        let mut batch = StagedBatch::new();
        batch.debit(&eth(), U256::from(40u64)).unwrap();
        batch.debit(&weth(), U256::from(11u64)).unwrap();
        let result = batch.apply(&mut constituents);
        assert!(matches!(result, Err(FundError::InsufficientBalance { .. })));
        assert_eq!(constituents[0].balance, U256::from(100u64));

        let mut batch = StagedBatch::new();
        batch.debit(&eth(), U256::from(40u64)).unwrap();
        batch.credit(&weth(), U256::from(20u64)).unwrap();
        batch.apply(&mut constituents).unwrap();
        assert_eq!(constituents[0].balance, U256::from(60u64));
        assert_eq!(constituents[1].balance, U256::from(30u64));
    }

    #[test]
    fn test_batch_rejects_unknown_asset() {
        let mut constituents = vec![Constituent::new(eth(), 10_000, U256::ZERO)];
        let mut batch = StagedBatch::new();
        batch.credit(&weth(), U256::from(1u64)).unwrap();
        assert!(matches!(
            batch.apply(&mut constituents),
            Err(FundError::InvalidConstituents(_))
        ));
    }
}
