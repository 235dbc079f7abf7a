use crate::core::access::{Role, RoleRegistry};
use crate::core::amount::parse_units;
use crate::core::asset::{Account, Asset};
use crate::core::fund::{DEFAULT_COOLDOWN_SECS, FundConfig, SHARE_DECIMALS};
use crate::core::price::PriceGraph;
use crate::providers::fixed_feed::FixedRateFeed;
use alloy_primitives::U256;
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FundSection {
    pub name: String,
    pub symbol: String,
    /// Asset all NAV figures are denominated in.
    pub pivot: String,
    /// Reference asset for USD valuations.
    pub usd: String,
    #[serde(default)]
    pub min_investment: Decimal,
    /// Share cap in whole shares; unlimited when absent.
    pub max_supply: Option<Decimal>,
    #[serde(default)]
    pub fee_bps: u64,
    pub treasury: String,
    pub fee_asset: String,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
}

fn default_cooldown_secs() -> i64 {
    DEFAULT_COOLDOWN_SECS
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssetConfig {
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeedConfig {
    pub base: String,
    pub quote: String,
    /// Quote per whole base unit, e.g. "2000.5".
    pub rate: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConstituentConfig {
    pub asset: String,
    pub weight: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct VenueConfig {
    #[serde(default)]
    pub fee_bps: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RolesConfig {
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub managers: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub fund: FundSection,
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    pub constituents: Vec<ConstituentConfig>,
    #[serde(default)]
    pub venue: VenueConfig,
    #[serde(default)]
    pub roles: RolesConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "xfund", "xfund")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Looks up a declared asset by symbol.
    pub fn asset(&self, symbol: &str) -> Result<Asset> {
        self.assets
            .iter()
            .find(|a| a.symbol == symbol)
            .map(|a| Asset::new(&a.symbol, a.decimals))
            .with_context(|| format!("Asset {symbol} is not declared under assets"))
    }

    pub fn fund_config(&self) -> Result<FundConfig> {
        let fund = &self.fund;
        let pivot = self.asset(&fund.pivot)?;
        let mut config = FundConfig::new(
            &fund.name,
            &fund.symbol,
            Account::new(&fund.treasury),
            self.asset(&fund.fee_asset)?,
        );
        config.min_investment = parse_units(fund.min_investment, pivot.decimals)
            .context("Invalid min_investment")?;
        config.max_supply = match fund.max_supply {
            Some(cap) => parse_units(cap, SHARE_DECIMALS).context("Invalid max_supply")?,
            None => U256::MAX,
        };
        config.fee_bps = fund.fee_bps;
        if fund.cooldown_secs < 0 {
            bail!("cooldown_secs must not be negative");
        }
        config.cooldown = chrono::Duration::seconds(fund.cooldown_secs);
        Ok(config)
    }

    /// Initial constituent assets and their weights, in config order.
    pub fn constituents(&self) -> Result<(Vec<Asset>, Vec<u64>)> {
        let tokens = self
            .constituents
            .iter()
            .map(|c| self.asset(&c.asset))
            .collect::<Result<Vec<_>>>()?;
        let weights = self.constituents.iter().map(|c| c.weight).collect();
        Ok((tokens, weights))
    }

    /// Builds the price graph with one fixed-rate feed per configured pair.
    pub async fn price_graph(&self) -> Result<PriceGraph> {
        let graph = PriceGraph::new(self.asset(&self.fund.pivot)?, self.asset(&self.fund.usd)?);
        for feed in &self.feeds {
            let source = FixedRateFeed::from_decimal(&feed.rate)
                .with_context(|| format!("Invalid rate for {}/{}", feed.base, feed.quote))?;
            graph
                .register_feed(
                    &self.asset(&feed.base)?,
                    &self.asset(&feed.quote)?,
                    Arc::new(source),
                )
                .await?;
        }
        Ok(graph)
    }

    pub fn role_registry(&self) -> RoleRegistry {
        let mut registry = RoleRegistry::new();
        for admin in &self.roles.admins {
            registry.grant(Role::Admin, Account::new(admin));
        }
        for manager in &self.roles.managers {
            registry.grant(Role::FundManager, Account::new(manager));
        }
        registry
    }
}
