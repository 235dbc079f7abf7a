//! NAV and share-price arithmetic.
//!
//! NAV is always denominated in native units of the pivot asset. All share
//! math truncates, so rounding never hands a holder more than their claim.

use crate::core::amount::{checked_add, mul_div};
use crate::core::error::{FundError, FundResult};
use crate::core::ledger::Constituent;
use crate::core::price::PriceGraph;
use alloy_primitives::U256;
use futures::future::try_join_all;
use tracing::debug;

/// Values each constituent's balance in pivot units, in constituent order.
pub async fn constituent_values(
    graph: &PriceGraph,
    constituents: &[Constituent],
) -> FundResult<Vec<U256>> {
    let lookups = constituents
        .iter()
        .map(|c| graph.get_price_for_amount(&c.asset, c.balance, true));
    try_join_all(lookups).await
}

/// Sum of every constituent's value in pivot units.
pub async fn total_valuation(graph: &PriceGraph, constituents: &[Constituent]) -> FundResult<U256> {
    let values = constituent_values(graph, constituents).await?;
    let nav = values
        .into_iter()
        .try_fold(U256::ZERO, checked_add)?;
    debug!("Total valuation: {}", nav);
    Ok(nav)
}

/// Shares to mint for a deposit worth `deposit_value` pivot units, priced
/// against the NAV before the deposit.
///
/// The first deposit into an empty fund mints 1:1 and defines the initial
/// share price.
pub fn mint_amount(total_supply: U256, nav_before: U256, deposit_value: U256) -> FundResult<U256> {
    if total_supply.is_zero() {
        return Ok(deposit_value);
    }
    if nav_before.is_zero() {
        return Err(FundError::ZeroValuation);
    }
    mul_div(deposit_value, total_supply, nav_before)
}

/// Pivot value of `shares` out of `total_supply`.
pub fn withdraw_value(shares: U256, nav: U256, total_supply: U256) -> FundResult<U256> {
    if total_supply.is_zero() {
        return Err(FundError::NotHoldingAmount);
    }
    mul_div(shares, nav, total_supply)
}

/// Portion of one constituent's balance released for `shares`.
pub fn release_amount(shares: U256, balance: U256, total_supply: U256) -> FundResult<U256> {
    if total_supply.is_zero() {
        return Err(FundError::NotHoldingAmount);
    }
    mul_div(shares, balance, total_supply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::price::tests::{eth, usd, weth};
    use crate::providers::fixed_feed::FixedRateFeed;
    use std::sync::Arc;

    #[test]
    fn test_bootstrap_mints_one_to_one() {
        let minted = mint_amount(U256::ZERO, U256::ZERO, U256::from(12_345u64)).unwrap();
        assert_eq!(minted, U256::from(12_345u64));
    }

    #[test]
    fn test_mint_preserves_share_price() {
        let supply = U256::from(1_000u64);
        let nav = U256::from(3_000u64);
        let deposit = U256::from(600u64);
        let minted = mint_amount(supply, nav, deposit).unwrap();
        assert_eq!(minted, U256::from(200u64));
        // 3600 / 1200 == 3000 / 1000
        assert_eq!((nav + deposit) / (supply + minted), nav / supply);
    }

    #[test]
    fn test_mint_against_worthless_fund_fails() {
        let result = mint_amount(U256::from(10u64), U256::ZERO, U256::from(1u64));
        assert!(matches!(result, Err(FundError::ZeroValuation)));
    }

    #[test]
    fn test_withdraw_math() {
        let supply = U256::from(300u64);
        assert_eq!(
            withdraw_value(U256::from(100u64), U256::from(900u64), supply).unwrap(),
            U256::from(300u64)
        );
        assert_eq!(
            release_amount(U256::from(100u64), U256::from(1_000u64), supply).unwrap(),
            U256::from(333u64)
        );
        assert!(withdraw_value(U256::from(1u64), U256::from(1u64), U256::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_total_valuation_sums_in_pivot() {
        let graph = PriceGraph::new(weth(), usd());
        graph
            .register_feed(
                &eth(),
                &weth(),
                Arc::new(FixedRateFeed::new(U256::from(2u64), 0)),
            )
            .await
            .unwrap();
        let constituents = vec![
            Constituent::new(eth(), 5_000, U256::from(10u64)),
            Constituent::new(weth(), 5_000, U256::from(7u64)),
        ];
        let nav = total_valuation(&graph, &constituents).await.unwrap();
        assert_eq!(nav, U256::from(27u64));
    }
}
