//! The fund aggregate: configuration, injected services, and the guarded
//! state that invest, withdraw and rebalance operate on.

use crate::core::access::{AccessPolicy, Role};
use crate::core::amount::{mul_div, pow10};
use crate::core::asset::{Account, Asset};
use crate::core::clock::Clock;
use crate::core::error::{FundError, FundResult};
use crate::core::ledger::{Constituent, ShareLedger};
use crate::core::price::PriceGraph;
use crate::core::rebalance::{FundStatus, RebalanceController};
use crate::core::swap::SwapAdapter;
use crate::core::valuation;
use alloy_primitives::U256;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_COOLDOWN_SECS: i64 = 600;

/// Decimals of the fund's own share unit.
pub const SHARE_DECIMALS: u8 = 18;

#[derive(Debug, Clone)]
pub struct FundConfig {
    pub name: String,
    pub symbol: String,
    /// Smallest deposit, and smallest position left after a partial
    /// withdrawal, in pivot units.
    pub min_investment: U256,
    pub max_supply: U256,
    /// Management fee per rebalance epoch, as a share of NAV.
    pub fee_bps: u64,
    pub treasury: Account,
    /// Constituent the fee is paid from.
    pub fee_asset: Asset,
    pub cooldown: Duration,
}

impl FundConfig {
    pub fn new(name: &str, symbol: &str, treasury: Account, fee_asset: Asset) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            min_investment: U256::ZERO,
            max_supply: U256::MAX,
            fee_bps: 0,
            treasury,
            fee_asset,
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
        }
    }
}

/// Collaborators injected into a fund.
#[derive(Clone)]
pub struct FundServices {
    pub graph: Arc<PriceGraph>,
    pub adapter: Arc<dyn SwapAdapter>,
    pub access: Arc<dyn AccessPolicy>,
    pub clock: Arc<dyn Clock>,
}

/// Everything an operation may change. Operations work on a copy and
/// commit it only when they succeed.
#[derive(Debug, Clone)]
pub(crate) struct FundState {
    pub(crate) ledger: ShareLedger,
    pub(crate) controller: RebalanceController,
}

/// The injected policy, plus the `Rebalancer` role for the fund's own
/// controller identity.
struct FundAccess {
    inner: Arc<dyn AccessPolicy>,
    rebalancer: Account,
}

impl AccessPolicy for FundAccess {
    fn has_role(&self, account: &Account, role: Role) -> bool {
        (role == Role::Rebalancer && account == &self.rebalancer)
            || self.inner.has_role(account, role)
    }
}

/// Rejects a state-changing call that starts while another is running.
#[derive(Debug, Default)]
struct OperationGuard {
    busy: AtomicBool,
}

pub(crate) struct Entered<'a> {
    busy: &'a AtomicBool,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl OperationGuard {
    fn enter(&self) -> FundResult<Entered<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| FundError::ReentrantCall)?;
        Ok(Entered { busy: &self.busy })
    }
}

pub struct Fund {
    config: FundConfig,
    graph: Arc<PriceGraph>,
    adapter: Arc<dyn SwapAdapter>,
    access: FundAccess,
    clock: Arc<dyn Clock>,
    state: Mutex<FundState>,
    guard: OperationGuard,
}

impl Fund {
    /// Creates an empty fund holding `tokens` at `weights`.
    pub fn create(
        config: FundConfig,
        tokens: &[Asset],
        weights: &[u64],
        services: FundServices,
    ) -> FundResult<Self> {
        let ledger = ShareLedger::new(tokens, weights)?;
        let controller = RebalanceController::new(services.clock.now(), config.cooldown);
        let rebalancer = Account::new(&format!("{}:rebalancer", config.symbol));
        info!(
            "Created fund {} ({}) with {} constituents",
            config.name,
            config.symbol,
            tokens.len()
        );

        Ok(Self {
            config,
            graph: services.graph,
            adapter: services.adapter,
            access: FundAccess {
                inner: services.access,
                rebalancer,
            },
            clock: services.clock,
            state: Mutex::new(FundState { ledger, controller }),
            guard: OperationGuard::default(),
        })
    }

    pub fn config(&self) -> &FundConfig {
        &self.config
    }

    pub fn graph(&self) -> &PriceGraph {
        &self.graph
    }

    pub fn adapter(&self) -> &dyn SwapAdapter {
        self.adapter.as_ref()
    }

    pub fn access(&self) -> &dyn AccessPolicy {
        &self.access
    }

    /// The injected policy alone, without the controller's own grant.
    pub(crate) fn external_access(&self) -> &dyn AccessPolicy {
        self.access.inner.as_ref()
    }

    /// Identity the controller uses to rewrite the constituent table.
    pub(crate) fn rebalancer(&self) -> &Account {
        &self.access.rebalancer
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn enter(&self) -> FundResult<Entered<'_>> {
        self.guard.enter()
    }

    pub(crate) async fn snapshot(&self) -> FundState {
        self.state.lock().await.clone()
    }

    pub(crate) async fn commit(&self, state: FundState) {
        *self.state.lock().await = state;
    }

    pub async fn total_supply(&self) -> U256 {
        self.state.lock().await.ledger.total_supply()
    }

    pub async fn balance_of(&self, holder: &Account) -> U256 {
        self.state.lock().await.ledger.balance_of(holder)
    }

    pub async fn constituents(&self) -> Vec<Constituent> {
        self.state.lock().await.ledger.constituents().to_vec()
    }

    pub async fn status(&self) -> FundStatus {
        self.state.lock().await.controller.status()
    }

    pub async fn is_paused(&self) -> bool {
        self.status().await == FundStatus::Paused
    }

    pub async fn last_weight_update(&self) -> DateTime<Utc> {
        self.state.lock().await.controller.clock().last_weight_update()
    }

    pub async fn last_fee_charge(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.controller.clock().last_fee_charge()
    }

    /// Net asset value in pivot units.
    pub async fn nav(&self) -> FundResult<U256> {
        let constituents = self.constituents().await;
        valuation::total_valuation(&self.graph, &constituents).await
    }

    /// Pivot value of one whole share; zero before the first deposit.
    pub async fn nav_per_share(&self) -> FundResult<U256> {
        let state = self.snapshot().await;
        let supply = state.ledger.total_supply();
        if supply.is_zero() {
            return Ok(U256::ZERO);
        }
        let nav = valuation::total_valuation(&self.graph, state.ledger.constituents()).await?;
        debug!("NAV {} over {} shares", nav, supply);
        mul_div(nav, pow10(SHARE_DECIMALS), supply)
    }
}
