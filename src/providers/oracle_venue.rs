use crate::core::amount::{BPS_DENOMINATOR, mul_div};
use crate::core::price::PriceGraph;
use crate::core::swap::{Fill, SwapAdapter, SwapOrder};
use alloy_primitives::U256;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Simulated venue that fills every order at the price graph rate, less a
/// flat venue fee.
pub struct OracleVenue {
    graph: Arc<PriceGraph>,
    fee_bps: u64,
}

impl OracleVenue {
    pub fn new(graph: Arc<PriceGraph>, fee_bps: u64) -> Result<Self> {
        if fee_bps > BPS_DENOMINATOR {
            bail!("Venue fee of {fee_bps} bps exceeds 100%");
        }
        Ok(OracleVenue { graph, fee_bps })
    }
}

#[async_trait]
impl SwapAdapter for OracleVenue {
    async fn swap(&self, order: &SwapOrder) -> Result<Fill> {
        let quoted = self
            .graph
            .convert_amount(&order.sell, &order.buy, order.amount_in)
            .await?;
        let amount_out = mul_div(
            quoted,
            U256::from(BPS_DENOMINATOR - self.fee_bps),
            U256::from(BPS_DENOMINATOR),
        )?;
        if amount_out < order.min_amount_out {
            bail!(
                "Fill of {} {} is below the minimum of {}",
                amount_out,
                order.buy,
                order.min_amount_out
            );
        }
        debug!(
            "Filled {} {} -> {} {}",
            order.amount_in, order.sell, amount_out, order.buy
        );
        Ok(Fill { amount_out })
    }
}
