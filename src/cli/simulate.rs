use crate::cli::ui;
use crate::core::amount::{BPS_DENOMINATOR, format_units, mul_div, parse_units};
use crate::core::asset::{Account, Asset};
use crate::core::clock::SystemClock;
use crate::core::config::AppConfig;
use crate::core::fund::{Fund, FundServices, SHARE_DECIMALS};
use crate::core::valuation;
use crate::providers::oracle_venue::OracleVenue;
use alloy_primitives::U256;
use anyhow::{Context, Result};
use comfy_table::Cell;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

const INVESTOR: &str = "investor";

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Deposit in whole pivot units.
    pub deposit: Decimal,
    /// New weights, one per configured constituent in config order.
    pub weights: Option<Vec<u64>>,
    pub slippage_bps: u64,
}

pub struct HoldingRow {
    pub asset: Asset,
    pub target_bps: u64,
    pub balance: U256,
    pub value: U256,
    pub actual_bps: u64,
}

/// Builds the configured fund against a simulated venue.
pub async fn build_fund(config: &AppConfig) -> Result<Fund> {
    let graph = Arc::new(config.price_graph().await?);
    let venue = OracleVenue::new(Arc::clone(&graph), config.venue.fee_bps)?;
    let services = FundServices {
        graph,
        adapter: Arc::new(venue),
        access: Arc::new(config.role_registry()),
        clock: Arc::new(SystemClock),
    };
    let (tokens, weights) = config.constituents()?;
    let fund = Fund::create(config.fund_config()?, &tokens, &weights, services)
        .context("Failed to create fund")?;
    Ok(fund)
}

pub async fn holdings(fund: &Fund) -> Result<Vec<HoldingRow>> {
    let constituents = fund.constituents().await;
    let values = valuation::constituent_values(fund.graph(), &constituents).await?;
    let nav = values.iter().fold(U256::ZERO, |acc, v| acc.saturating_add(*v));

    constituents
        .into_iter()
        .zip(values)
        .map(|(c, value)| {
            let actual_bps = if nav.is_zero() {
                0
            } else {
                mul_div(value, U256::from(BPS_DENOMINATOR), nav)?.to::<u64>()
            };
            Ok(HoldingRow {
                asset: c.asset,
                target_bps: c.weight_bps,
                balance: c.balance,
                value,
                actual_bps,
            })
        })
        .collect()
}

async fn display_holdings(fund: &Fund, title: &str) -> Result<()> {
    let pivot = fund.graph().pivot().clone();
    let rows = holdings(fund).await?;

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell("Balance"),
        ui::header_cell(&format!("Value ({pivot})")),
        ui::header_cell("Target (bps)"),
        ui::header_cell("Actual (bps)"),
        ui::header_cell("Drift"),
    ]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(&row.asset.symbol),
            ui::amount_cell(format_units(row.balance, row.asset.decimals, 6)),
            ui::amount_cell(format_units(row.value, pivot.decimals, 6)),
            ui::amount_cell(row.target_bps.to_string()),
            ui::amount_cell(row.actual_bps.to_string()),
            ui::drift_cell(row.actual_bps, row.target_bps),
        ]);
    }

    let nav = fund.nav().await?;
    let nav_per_share = fund.nav_per_share().await?;
    println!("{}", ui::style_text(title, ui::StyleType::Title));
    println!("{table}");
    println!(
        "{} {} {}",
        ui::style_text("NAV:", ui::StyleType::TotalLabel),
        ui::style_text(&format_units(nav, pivot.decimals, 6), ui::StyleType::TotalValue),
        pivot
    );
    println!(
        "{} {} {}",
        ui::style_text("NAV per share:", ui::StyleType::TotalLabel),
        ui::style_text(
            &format_units(nav_per_share, pivot.decimals, 6),
            ui::StyleType::TotalValue
        ),
        pivot
    );
    println!(
        "{}",
        ui::style_text(
            &format!(
                "Supply: {} {}",
                format_units(fund.total_supply().await, SHARE_DECIMALS, 6),
                fund.config().symbol
            ),
            ui::StyleType::Subtle
        )
    );
    Ok(())
}

fn operator(config: &AppConfig) -> Result<Account> {
    config
        .roles
        .managers
        .first()
        .or_else(|| config.roles.admins.first())
        .map(|id| Account::new(id))
        .context("Rebalancing needs a manager or admin under roles")
}

pub async fn run(config: &AppConfig, options: &SimulateOptions) -> Result<()> {
    let fund = build_fund(config).await?;
    let pivot = fund.graph().pivot().clone();
    let deposit = parse_units(options.deposit, pivot.decimals)
        .with_context(|| format!("Invalid deposit for {pivot}"))?;

    let investor = Account::new(INVESTOR);
    let minted = fund
        .invest(&investor, deposit, options.slippage_bps)
        .await
        .context("Investment failed")?;
    info!("Investor received {} shares", minted);
    display_holdings(&fund, "Holdings after deposit").await?;

    let Some(weights) = &options.weights else {
        return Ok(());
    };
    fund.update_weights(&operator(config)?, weights, options.slippage_bps)
        .await
        .context("Rebalance failed")?;

    ui::print_separator();
    display_holdings(&fund, "Holdings after rebalance").await?;

    match fund.charge_fee().await {
        Ok(charge) => println!(
            "{}",
            ui::style_text(
                &format!(
                    "Fee of {} {} charged to {}",
                    format_units(charge.amount, charge.asset.decimals, 6),
                    charge.asset,
                    charge.treasury
                ),
                ui::StyleType::Subtle
            )
        ),
        Err(e) => {
            warn!("Fee was not charged: {}", e);
            println!(
                "{}",
                ui::style_text(&format!("Fee not charged: {e}"), ui::StyleType::Error)
            );
        }
    }
    Ok(())
}
