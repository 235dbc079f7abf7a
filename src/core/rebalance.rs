//! Pause/cooldown state machine, fee epochs, and convergence of holdings
//! toward target weights.

use crate::core::access::{Role, require_manager};
use crate::core::amount::{BPS_DENOMINATOR, bps_of, checked_add, mul_div};
use crate::core::asset::{Account, Asset};
use crate::core::error::{FundError, FundResult};
use crate::core::fund::Fund;
use crate::core::ledger::{Constituent, validate_constituents};
use crate::core::swap::{StagedBatch, execute_leg};
use crate::core::valuation;
use alloy_primitives::U256;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundStatus {
    Active,
    Paused,
}

impl Display for FundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FundStatus::Active => "Active",
                FundStatus::Paused => "Paused",
            }
        )
    }
}

/// Fee paid to the treasury for one rebalance epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCharge {
    pub treasury: Account,
    pub asset: Asset,
    /// Amount of `asset` paid, in its native units.
    pub amount: U256,
    /// The same amount valued in pivot units.
    pub value: U256,
}

/// Timestamps gating unpause and fee collection.
#[derive(Debug, Clone)]
pub struct RebalanceClock {
    last_weight_update: DateTime<Utc>,
    last_fee_charge: Option<DateTime<Utc>>,
    fee_pending: bool,
    cooldown: Duration,
}

impl RebalanceClock {
    pub fn last_weight_update(&self) -> DateTime<Utc> {
        self.last_weight_update
    }

    pub fn last_fee_charge(&self) -> Option<DateTime<Utc>> {
        self.last_fee_charge
    }

    /// Time left before anyone may unpause; zero once elapsed.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.cooldown - (now - self.last_weight_update);
        remaining.max(Duration::zero())
    }
}

#[derive(Debug, Clone)]
pub struct RebalanceController {
    status: FundStatus,
    clock: RebalanceClock,
}

impl RebalanceController {
    /// A fresh fund starts active, with its epoch counted as already charged.
    pub fn new(created_at: DateTime<Utc>, cooldown: Duration) -> Self {
        Self {
            status: FundStatus::Active,
            clock: RebalanceClock {
                last_weight_update: created_at,
                last_fee_charge: None,
                fee_pending: false,
                cooldown,
            },
        }
    }

    pub fn status(&self) -> FundStatus {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.status == FundStatus::Paused
    }

    pub fn clock(&self) -> &RebalanceClock {
        &self.clock
    }

    fn pause(&mut self) {
        self.status = FundStatus::Paused;
    }

    fn unpause(&mut self, is_admin: bool, now: DateTime<Utc>) -> FundResult<()> {
        let remaining = self.clock.cooldown_remaining(now);
        if !is_admin && remaining > Duration::zero() {
            return Err(FundError::CooldownActive {
                remaining_secs: remaining.num_seconds(),
            });
        }
        self.status = FundStatus::Active;
        Ok(())
    }

    fn stamp_rebalance(&mut self, now: DateTime<Utc>) {
        self.clock.last_weight_update = now;
        self.clock.fee_pending = true;
    }

    fn stamp_fee(&mut self, now: DateTime<Utc>) -> FundResult<()> {
        if !self.clock.fee_pending {
            return Err(FundError::AlreadyCharged);
        }
        self.clock.fee_pending = false;
        self.clock.last_fee_charge = Some(now);
        Ok(())
    }
}

/// Moves `constituents` toward their target weights.
///
/// Over-weighted holdings are sold into the pivot, largest excess first. The
/// pivot pool (sale proceeds plus `pool`) is then spread over under-weighted
/// holdings in proportion to their deficits, smallest deficit first, with the
/// last leg taking whatever truncation left over. Nothing is applied unless
/// every leg succeeds.
async fn converge(
    fund: &Fund,
    constituents: &mut [Constituent],
    pool: U256,
    slippage_bps: u64,
) -> FundResult<()> {
    let graph = fund.graph();
    let pivot = graph.pivot().clone();
    let values = valuation::constituent_values(graph, constituents).await?;
    let nav = values
        .iter()
        .copied()
        .try_fold(pool, checked_add)?;
    if nav.is_zero() {
        debug!("Nothing to rebalance in an empty fund");
        return Ok(());
    }

    let mut excesses = Vec::new();
    let mut deficits = Vec::new();
    for (index, (constituent, value)) in constituents.iter().zip(&values).enumerate() {
        let target = bps_of(nav, constituent.weight_bps)?;
        if *value > target {
            excesses.push((index, *value - target));
        } else if target > *value {
            deficits.push((index, target - *value));
        }
    }
    excesses.sort_by(|a, b| b.1.cmp(&a.1));
    deficits.sort_by(|a, b| a.1.cmp(&b.1));

    let mut batch = StagedBatch::new();
    let mut pool = pool;
    for (index, excess) in &excesses {
        let constituent = &constituents[*index];
        let amount = mul_div(constituent.balance, *excess, values[*index])?;
        let received = execute_leg(
            graph,
            fund.adapter(),
            &constituent.asset,
            &pivot,
            amount,
            slippage_bps,
        )
        .await?;
        batch.debit(&constituent.asset, amount)?;
        pool = checked_add(pool, received)?;
    }

    if !pool.is_zero() {
        if deficits.is_empty() {
            // Rounding left proceeds but no gap; park them in the heaviest target
            let heaviest = constituents
                .iter()
                .enumerate()
                .max_by_key(|(_, c)| c.weight_bps)
                .map(|(index, _)| index)
                .unwrap_or_default();
            deficits.push((heaviest, U256::from(1u64)));
        }
        let total_deficit = deficits
            .iter()
            .map(|(_, deficit)| *deficit)
            .try_fold(U256::ZERO, checked_add)?;

        let mut remaining = pool;
        let last = deficits.len() - 1;
        for (position, (index, deficit)) in deficits.iter().enumerate() {
            let spend = if position == last {
                remaining
            } else {
                mul_div(pool, *deficit, total_deficit)?
            };
            remaining -= spend;
            let asset = &constituents[*index].asset;
            let received =
                execute_leg(graph, fund.adapter(), &pivot, asset, spend, slippage_bps).await?;
            batch.credit(asset, received)?;
        }
    }

    if batch.is_empty() {
        debug!("Holdings already match target weights");
    }
    batch.apply(constituents)
}

impl Fund {
    /// Pauses or unpauses the fund.
    ///
    /// Pausing needs fund-manager authority. Unpausing is open to anyone
    /// once the cooldown since the last weight update has elapsed, and to
    /// admins at any time.
    #[instrument(name = "SetPause", skip(self, caller), fields(caller = %caller))]
    pub async fn set_pause(&self, caller: &Account, paused: bool) -> FundResult<()> {
        let _entered = self.enter()?;
        let mut state = self.snapshot().await;
        if paused {
            require_manager(self.access(), caller)?;
            state.controller.pause();
        } else {
            let is_admin = self.access().has_role(caller, Role::Admin);
            state.controller.unpause(is_admin, self.now())?;
        }
        self.commit(state).await;
        info!("Fund is now {}", if paused { "paused" } else { "active" });
        Ok(())
    }

    /// Rebalances the current constituents to `weights`, one per constituent
    /// in the order the table was created or last set by `update_tokens`.
    #[instrument(name = "UpdateWeights", skip(self, caller), fields(caller = %caller))]
    pub async fn update_weights(
        &self,
        caller: &Account,
        weights: &[u64],
        slippage_bps: u64,
    ) -> FundResult<()> {
        let _entered = self.enter()?;
        require_manager(self.access(), caller)?;
        let mut state = self.snapshot().await;
        if state.controller.is_paused() {
            return Err(FundError::Paused);
        }
        let tokens: Vec<Asset> = state
            .ledger
            .constituents()
            .iter()
            .map(|c| c.asset.clone())
            .collect();
        validate_constituents(&tokens, weights)?;

        state
            .ledger
            .set_constituents(self.access(), self.rebalancer(), &tokens, weights)?;
        converge(self, state.ledger.constituents_mut(), U256::ZERO, slippage_bps).await?;

        state.controller.stamp_rebalance(self.now());
        self.commit(state).await;
        info!("Rebalanced to weights {:?}", weights);
        Ok(())
    }

    /// Replaces the constituent set with `tokens` at `weights`, liquidating
    /// dropped holdings into the pivot before converging.
    #[instrument(name = "UpdateTokens", skip(self, caller, tokens), fields(caller = %caller))]
    pub async fn update_tokens(
        &self,
        caller: &Account,
        tokens: &[Asset],
        weights: &[u64],
        slippage_bps: u64,
    ) -> FundResult<()> {
        let _entered = self.enter()?;
        require_manager(self.access(), caller)?;
        let mut state = self.snapshot().await;
        if state.controller.is_paused() {
            return Err(FundError::Paused);
        }
        validate_constituents(tokens, weights)?;
        for token in tokens {
            // Every new constituent must be priceable before anything moves
            self.graph().get_price(token, self.graph().pivot()).await?;
        }

        let pivot = self.graph().pivot().clone();
        let mut batch = StagedBatch::new();
        let mut pool = U256::ZERO;
        for dropped in state
            .ledger
            .constituents()
            .iter()
            .filter(|c| !tokens.contains(&c.asset))
        {
            let received = execute_leg(
                self.graph(),
                self.adapter(),
                &dropped.asset,
                &pivot,
                dropped.balance,
                slippage_bps,
            )
            .await?;
            batch.debit(&dropped.asset, dropped.balance)?;
            pool = checked_add(pool, received)?;
            debug!("Liquidated {} {} into {}", dropped.balance, dropped.asset, pivot);
        }
        batch.apply(state.ledger.constituents_mut())?;

        state
            .ledger
            .set_constituents(self.access(), self.rebalancer(), tokens, weights)?;
        converge(self, state.ledger.constituents_mut(), pool, slippage_bps).await?;

        state.controller.stamp_rebalance(self.now());
        self.commit(state).await;
        info!(
            "Replaced constituents with {}",
            tokens
                .iter()
                .map(|t| t.symbol.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Pays the management fee for the current epoch out of the reserve
    /// constituent. Succeeds at most once per completed rebalance.
    #[instrument(name = "ChargeFee", skip(self))]
    pub async fn charge_fee(&self) -> FundResult<FeeCharge> {
        let _entered = self.enter()?;
        let mut state = self.snapshot().await;
        state.controller.stamp_fee(self.now())?;

        let reserve = self.config().fee_asset.clone();
        if !state
            .ledger
            .constituents()
            .iter()
            .any(|c| c.asset == reserve)
        {
            return Err(FundError::ReserveNotHeld(reserve.symbol));
        }

        let nav = valuation::total_valuation(self.graph(), state.ledger.constituents()).await?;
        let value = bps_of(nav, self.config().fee_bps)?;
        let amount = self.graph().get_price_for_amount(&reserve, value, false).await?;
        if value.is_zero() {
            warn!("Fee for this epoch rounds to zero");
        }

        let mut batch = StagedBatch::new();
        batch.debit(&reserve, amount)?;
        batch.apply(state.ledger.constituents_mut())?;
        self.commit(state).await;

        let charge = FeeCharge {
            treasury: self.config().treasury.clone(),
            asset: reserve,
            amount,
            value,
        };
        info!(
            "Charged {} {} ({} of {} bps) to {}",
            charge.amount, charge.asset, charge.value, BPS_DENOMINATOR, charge.treasury
        );
        Ok(charge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_unpause_waits_for_cooldown() {
        let mut controller = RebalanceController::new(start(), Duration::seconds(600));
        controller.pause();

        let early = controller.unpause(false, start() + Duration::seconds(599));
        assert!(matches!(
            early,
            Err(FundError::CooldownActive { remaining_secs: 1 })
        ));
        assert!(controller.is_paused());

        controller
            .unpause(false, start() + Duration::seconds(600))
            .unwrap();
        assert_eq!(controller.status(), FundStatus::Active);
    }

    #[test]
    fn test_admin_skips_cooldown() {
        let mut controller = RebalanceController::new(start(), Duration::seconds(600));
        controller.pause();
        controller.unpause(true, start()).unwrap();
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_fee_once_per_epoch() {
        let mut controller = RebalanceController::new(start(), Duration::seconds(600));
        assert!(matches!(
            controller.stamp_fee(start()),
            Err(FundError::AlreadyCharged)
        ));

        controller.stamp_rebalance(start() + Duration::seconds(10));
        controller.stamp_fee(start() + Duration::seconds(20)).unwrap();
        assert_eq!(
            controller.clock().last_fee_charge(),
            Some(start() + Duration::seconds(20))
        );
        assert!(matches!(
            controller.stamp_fee(start() + Duration::seconds(30)),
            Err(FundError::AlreadyCharged)
        ));
    }

    #[test]
    fn test_rebalance_restarts_cooldown() {
        let mut controller = RebalanceController::new(start(), Duration::seconds(600));
        let later = start() + Duration::seconds(900);
        assert_eq!(controller.clock().cooldown_remaining(later), Duration::zero());
        controller.stamp_rebalance(later);
        assert_eq!(
            controller.clock().cooldown_remaining(later),
            Duration::seconds(600)
        );
        assert_eq!(controller.clock().last_weight_update(), later);
    }
}
