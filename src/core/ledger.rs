//! Share supply, holder balances and the constituent table, plus the
//! invest and withdraw entry points that move them.

use crate::core::access::{AccessPolicy, require_rebalancer};
use crate::core::amount::{BPS_DENOMINATOR, bps_of, checked_add};
use crate::core::asset::{Account, Asset};
use crate::core::error::{FundError, FundResult};
use crate::core::fund::Fund;
use crate::core::swap::{StagedBatch, execute_leg};
use crate::core::valuation;
use alloy_primitives::U256;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

/// One held asset, its balance in native units, and its target weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constituent {
    pub asset: Asset,
    pub weight_bps: u64,
    pub balance: U256,
}

impl Constituent {
    pub fn new(asset: Asset, weight_bps: u64, balance: U256) -> Self {
        Self {
            asset,
            weight_bps,
            balance,
        }
    }
}

/// Fails unless the weights sum to exactly 10,000 bps.
pub fn validate_weights(weights: &[u64]) -> FundResult<()> {
    let sum = weights
        .iter()
        .try_fold(0u64, |acc, w| acc.checked_add(*w))
        .unwrap_or(u64::MAX);
    if sum != BPS_DENOMINATOR {
        return Err(FundError::InvalidWeights { sum });
    }
    Ok(())
}

/// Checks a candidate constituent list against its weights.
pub fn validate_constituents(tokens: &[Asset], weights: &[u64]) -> FundResult<()> {
    if tokens.is_empty() {
        return Err(FundError::InvalidConstituents("no tokens given".to_string()));
    }
    if tokens.len() != weights.len() {
        return Err(FundError::InvalidConstituents(format!(
            "{} tokens but {} weights",
            tokens.len(),
            weights.len()
        )));
    }
    let mut seen = HashSet::new();
    for token in tokens {
        if !seen.insert(&token.symbol) {
            return Err(FundError::InvalidConstituents(format!(
                "{token} is listed twice"
            )));
        }
    }
    validate_weights(weights)
}

/// Result of a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    /// Value released, in pivot units.
    pub released_value: U256,
    /// What leaves the fund: one pivot payout for cash withdrawals, one entry
    /// per constituent for in-kind ones.
    pub payouts: Vec<(Asset, U256)>,
}

#[derive(Debug, Clone)]
pub struct ShareLedger {
    total_supply: U256,
    holders: HashMap<Account, U256>,
    constituents: Vec<Constituent>,
}

impl ShareLedger {
    pub fn new(tokens: &[Asset], weights: &[u64]) -> FundResult<Self> {
        validate_constituents(tokens, weights)?;
        let mut ledger = Self {
            total_supply: U256::ZERO,
            holders: HashMap::new(),
            constituents: Vec::new(),
        };
        ledger.replace_constituents(tokens, weights)?;
        Ok(ledger)
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, holder: &Account) -> U256 {
        self.holders.get(holder).copied().unwrap_or_default()
    }

    pub fn holders(&self) -> impl Iterator<Item = (&Account, &U256)> {
        self.holders.iter()
    }

    pub fn constituents(&self) -> &[Constituent] {
        &self.constituents
    }

    pub(crate) fn constituents_mut(&mut self) -> &mut [Constituent] {
        &mut self.constituents
    }

    pub(crate) fn mint(&mut self, to: &Account, amount: U256) -> FundResult<()> {
        let balance = checked_add(self.balance_of(to), amount)?;
        self.total_supply = checked_add(self.total_supply, amount)?;
        self.holders.insert(to.clone(), balance);
        Ok(())
    }

    pub(crate) fn burn(&mut self, from: &Account, amount: U256) -> FundResult<()> {
        let balance = self
            .balance_of(from)
            .checked_sub(amount)
            .ok_or(FundError::NotHoldingAmount)?;
        self.total_supply = self
            .total_supply
            .checked_sub(amount)
            .ok_or(FundError::NotHoldingAmount)?;
        if balance.is_zero() {
            self.holders.remove(from);
        } else {
            self.holders.insert(from.clone(), balance);
        }
        Ok(())
    }

    /// Replaces the constituent list and weight table. Only the rebalancer
    /// may call this, and only once dropped tokens hold no balance.
    pub fn set_constituents(
        &mut self,
        policy: &dyn AccessPolicy,
        caller: &Account,
        tokens: &[Asset],
        weights: &[u64],
    ) -> FundResult<()> {
        require_rebalancer(policy, caller)?;
        validate_constituents(tokens, weights)?;
        self.replace_constituents(tokens, weights)
    }

    fn replace_constituents(&mut self, tokens: &[Asset], weights: &[u64]) -> FundResult<()> {
        if let Some(stranded) = self
            .constituents
            .iter()
            .find(|c| !c.balance.is_zero() && !tokens.contains(&c.asset))
        {
            return Err(FundError::InvalidConstituents(format!(
                "{} still holds a balance",
                stranded.asset
            )));
        }

        let mut next: Vec<Constituent> = tokens
            .iter()
            .zip(weights)
            .map(|(asset, weight)| {
                let balance = self
                    .constituents
                    .iter()
                    .find(|c| &c.asset == asset)
                    .map_or(U256::ZERO, |c| c.balance);
                Constituent::new(asset.clone(), *weight, balance)
            })
            .collect();
        self.constituents = next;
        Ok(())
    }
}

/// Splits a deposit across constituents by target weight, heaviest first.
/// Truncation dust goes to the heaviest leg so the whole deposit is spent.
/// Equal weights keep table order.
fn allocate_deposit(constituents: &[Constituent], deposit: U256) -> FundResult<Vec<(Asset, U256)>> {
    let mut ordered: Vec<&Constituent> = constituents.iter().collect();
    ordered.sort_by(|a, b| b.weight_bps.cmp(&a.weight_bps));
    let mut legs = ordered
        .into_iter()
        .map(|c| Ok((c.asset.clone(), bps_of(deposit, c.weight_bps)?)))
        .collect::<FundResult<Vec<_>>>()?;
    let allocated = legs
        .iter()
        .map(|(_, amount)| *amount)
        .try_fold(U256::ZERO, checked_add)?;
    if let Some((_, first)) = legs.first_mut() {
        *first = checked_add(*first, deposit - allocated)?;
    }
    Ok(legs)
}

impl Fund {
    /// Deposits `deposit_value` pivot units and mints shares to `caller`.
    ///
    /// Every constituent is bought in turn; if any leg fails, nothing is
    /// minted and no balance changes. Shares are priced on what the legs
    /// actually filled, valued in the pivot, so venue costs fall on the
    /// depositor. The first deposit mints 1:1 against `deposit_value`.
    #[instrument(name = "Invest", skip(self, caller), fields(caller = %caller))]
    pub async fn invest(
        &self,
        caller: &Account,
        deposit_value: U256,
        slippage_bps: u64,
    ) -> FundResult<U256> {
        let _entered = self.enter()?;
        let mut state = self.snapshot().await;
        if state.controller.is_paused() {
            return Err(FundError::Paused);
        }
        if deposit_value.is_zero() {
            return Err(FundError::InvalidAmount);
        }
        if deposit_value < self.config().min_investment {
            return Err(FundError::WrongInvestmentAmount(format!(
                "{} is below the minimum of {}",
                deposit_value,
                self.config().min_investment
            )));
        }

        let supply = state.ledger.total_supply();
        let nav_before =
            valuation::total_valuation(self.graph(), state.ledger.constituents()).await?;

        let pivot = self.graph().pivot().clone();
        let mut batch = StagedBatch::new();
        let mut realized = U256::ZERO;
        for (asset, amount) in allocate_deposit(state.ledger.constituents(), deposit_value)? {
            let received = execute_leg(
                self.graph(),
                self.adapter(),
                &pivot,
                &asset,
                amount,
                slippage_bps,
            )
            .await?;
            let value = self.graph().get_price_for_amount(&asset, received, true).await?;
            realized = checked_add(realized, value)?;
            batch.credit(&asset, received)?;
        }
        debug!("Deposit of {} realized {}", deposit_value, realized);

        let basis = if supply.is_zero() {
            deposit_value
        } else {
            realized
        };
        let minted = valuation::mint_amount(supply, nav_before, basis)?;
        if minted.is_zero() {
            return Err(FundError::WrongInvestmentAmount(
                "deposit is too small to mint a share".to_string(),
            ));
        }
        if checked_add(supply, minted)? > self.config().max_supply {
            return Err(FundError::WrongInvestmentAmount(format!(
                "minting {} would exceed the supply cap of {}",
                minted,
                self.config().max_supply
            )));
        }

        batch.apply(state.ledger.constituents_mut())?;
        state.ledger.mint(caller, minted)?;
        self.commit(state).await;

        info!("Minted {} shares for a deposit of {}", minted, deposit_value);
        Ok(minted)
    }

    /// Burns `share_amount` of the caller's shares and releases the
    /// proportional slice of every constituent, either converted to the
    /// pivot or in kind.
    #[instrument(name = "Withdraw", skip(self, caller), fields(caller = %caller))]
    pub async fn withdraw(
        &self,
        caller: &Account,
        share_amount: U256,
        slippage_bps: u64,
        in_kind: bool,
    ) -> FundResult<Withdrawal> {
        let _entered = self.enter()?;
        let before = self.snapshot().await;
        if before.controller.is_paused() {
            return Err(FundError::Paused);
        }
        if share_amount.is_zero() {
            return Err(FundError::InvalidAmount);
        }
        let balance = before.ledger.balance_of(caller);
        if balance < share_amount {
            return Err(FundError::NotHoldingAmount);
        }

        let supply = before.ledger.total_supply();
        let nav = valuation::total_valuation(self.graph(), before.ledger.constituents()).await?;
        let remaining = balance - share_amount;
        if !remaining.is_zero()
            && valuation::withdraw_value(remaining, nav, supply)? < self.config().min_investment
        {
            return Err(FundError::BelowMinimumInvestment);
        }

        let releases = before
            .ledger
            .constituents()
            .iter()
            .map(|c| {
                Ok((
                    c.asset.clone(),
                    valuation::release_amount(share_amount, c.balance, supply)?,
                ))
            })
            .collect::<FundResult<Vec<_>>>()?;

        // Burn is committed before any venue call
        let mut state = before.clone();
        state.ledger.burn(caller, share_amount)?;
        self.commit(state.clone()).await;

        let outcome = async {
            let (batch, withdrawal) = self.release(&releases, slippage_bps, in_kind).await?;
            batch.apply(state.ledger.constituents_mut())?;
            Ok::<Withdrawal, FundError>(withdrawal)
        }
        .await;

        match outcome {
            Ok(withdrawal) => {
                self.commit(state).await;
                info!(
                    "Burned {} shares, released {}",
                    share_amount, withdrawal.released_value
                );
                Ok(withdrawal)
            }
            Err(e) => {
                debug!("Withdrawal failed, restoring burned shares: {}", e);
                self.commit(before).await;
                Err(e)
            }
        }
    }

    async fn release(
        &self,
        releases: &[(Asset, U256)],
        slippage_bps: u64,
        in_kind: bool,
    ) -> FundResult<(StagedBatch, Withdrawal)> {
        let pivot = self.graph().pivot().clone();
        let mut batch = StagedBatch::new();
        let mut released_value = U256::ZERO;
        let mut payouts = Vec::new();

        for (asset, amount) in releases {
            batch.debit(asset, *amount)?;
            if in_kind {
                let value = self.graph().get_price_for_amount(asset, *amount, true).await?;
                released_value = checked_add(released_value, value)?;
                payouts.push((asset.clone(), *amount));
            } else {
                let received = execute_leg(
                    self.graph(),
                    self.adapter(),
                    asset,
                    &pivot,
                    *amount,
                    slippage_bps,
                )
                .await?;
                released_value = checked_add(released_value, received)?;
            }
        }
        if !in_kind {
            payouts.push((pivot, released_value));
        }

        Ok((
            batch,
            Withdrawal {
                released_value,
                payouts,
            },
        ))
    }

    /// Replaces the constituent table directly. Only accounts the injected
    /// policy grants `Rebalancer` may call this; the fund's own controller
    /// identity is not honored here.
    #[instrument(name = "SetConstituents", skip(self, caller), fields(caller = %caller))]
    pub async fn set_constituents(
        &self,
        caller: &Account,
        tokens: &[Asset],
        weights: &[u64],
    ) -> FundResult<()> {
        let _entered = self.enter()?;
        let mut state = self.snapshot().await;
        state
            .ledger
            .set_constituents(self.external_access(), caller, tokens, weights)?;
        self.commit(state).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::{Role, RoleRegistry};
    use crate::core::price::tests::{doge, eth, weth};

    #[test]
    fn test_weight_validation() {
        assert!(validate_weights(&[5_000, 5_000]).is_ok());
        assert!(matches!(
            validate_weights(&[100, 1_000]),
            Err(FundError::InvalidWeights { sum: 1_100 })
        ));
        assert!(matches!(
            validate_weights(&[u64::MAX, 2]),
            Err(FundError::InvalidWeights { .. })
        ));
    }

    #[test]
    fn test_constituent_validation() {
        assert!(matches!(
            validate_constituents(&[eth(), eth()], &[5_000, 5_000]),
            Err(FundError::InvalidConstituents(_))
        ));
        assert!(matches!(
            validate_constituents(&[eth()], &[5_000, 5_000]),
            Err(FundError::InvalidConstituents(_))
        ));
        assert!(matches!(
            validate_constituents(&[], &[]),
            Err(FundError::InvalidConstituents(_))
        ));
    }

    #[test]
    fn test_mint_and_burn_track_supply() {
        let mut ledger = ShareLedger::new(&[eth()], &[10_000]).unwrap();
        let alice = Account::new("alice");
        let bob = Account::new("bob");

        ledger.mint(&alice, U256::from(70u64)).unwrap();
        ledger.mint(&bob, U256::from(30u64)).unwrap();
        assert_eq!(ledger.total_supply(), U256::from(100u64));

        assert!(matches!(
            ledger.burn(&bob, U256::from(31u64)),
            Err(FundError::NotHoldingAmount)
        ));
        ledger.burn(&bob, U256::from(30u64)).unwrap();
        assert_eq!(ledger.balance_of(&bob), U256::ZERO);
        assert_eq!(ledger.holders().count(), 1);

        let held = ledger
            .holders()
            .fold(U256::ZERO, |acc, (_, balance)| acc + *balance);
        assert_eq!(held, ledger.total_supply());
    }

    #[test]
    fn test_set_constituents_requires_rebalancer() {
        let mut ledger = ShareLedger::new(&[eth(), weth()], &[5_000, 5_000]).unwrap();
        let mut registry = RoleRegistry::new();
        registry.grant(Role::Rebalancer, Account::new("controller"));

        let result =
            ledger.set_constituents(&registry, &Account::new("mallory"), &[doge()], &[10_000]);
        assert!(matches!(result, Err(FundError::NotRebalancer(_))));

        ledger
            .set_constituents(
                &registry,
                &Account::new("controller"),
                &[doge(), eth()],
                &[2_000, 8_000],
            )
            .unwrap();
        let symbols: Vec<_> = ledger
            .constituents()
            .iter()
            .map(|c| c.asset.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["DOGE", "ETH"]);
    }

    #[test]
    fn test_dropping_a_funded_constituent_is_rejected() {
        let mut ledger = ShareLedger::new(&[eth(), weth()], &[5_000, 5_000]).unwrap();
        ledger.constituents_mut()[0].balance = U256::from(1u64);
        let mut registry = RoleRegistry::new();
        registry.grant(Role::Rebalancer, Account::new("controller"));

        let result =
            ledger.set_constituents(&registry, &Account::new("controller"), &[weth()], &[10_000]);
        assert!(matches!(result, Err(FundError::InvalidConstituents(_))));
        assert_eq!(ledger.constituents().len(), 2);
    }

    #[test]
    fn test_allocate_deposit_spends_everything() {
        let constituents = vec![
            Constituent::new(weth(), 3_333, U256::ZERO),
            Constituent::new(eth(), 6_667, U256::ZERO),
        ];
        let legs = allocate_deposit(&constituents, U256::from(100u64)).unwrap();
        assert_eq!(legs[0], (eth(), U256::from(67u64)));
        assert_eq!(legs[1], (weth(), U256::from(33u64)));
    }

    #[test]
    fn test_weight_changes_keep_table_order() {
        let mut ledger = ShareLedger::new(&[eth(), weth()], &[5_000, 5_000]).unwrap();
        let mut registry = RoleRegistry::new();
        registry.grant(Role::Rebalancer, Account::new("controller"));

        for _ in 0..2 {
            ledger
                .set_constituents(
                    &registry,
                    &Account::new("controller"),
                    &[eth(), weth()],
                    &[3_333, 6_667],
                )
                .unwrap();
            let table: Vec<_> = ledger
                .constituents()
                .iter()
                .map(|c| (c.asset.symbol.as_str(), c.weight_bps))
                .collect();
            assert_eq!(table, vec![("ETH", 3_333), ("WETH", 6_667)]);
        }
    }
}
