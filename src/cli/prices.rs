use crate::cli::ui;
use crate::core::amount::{format_units, pow10};
use crate::core::asset::Asset;
use crate::core::config::AppConfig;
use crate::core::price::PriceGraph;
use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, warn};

/// One row of the price table: an asset and what one whole unit is worth.
pub struct PriceRow {
    pub asset: Asset,
    pub in_pivot: Option<String>,
    pub in_usd: Option<String>,
}

/// Values one whole unit of every configured asset. Unresolvable pairs are
/// reported as `None` rather than failing the whole table.
pub async fn resolve_prices(config: &AppConfig, graph: &PriceGraph) -> Result<Vec<PriceRow>> {
    let assets = config
        .assets
        .iter()
        .map(|a| config.asset(&a.symbol))
        .collect::<Result<Vec<_>>>()?;

    let rows = assets.into_iter().map(|asset| async move {
        let unit = pow10(asset.decimals);
        let in_pivot = match graph.get_price_for_amount(&asset, unit, true).await {
            Ok(value) => Some(format_units(value, graph.pivot().decimals, 6)),
            Err(e) => {
                warn!("No {} price for {}: {}", graph.pivot(), asset, e);
                None
            }
        };
        let in_usd = match graph.get_price_in_usd(&asset, unit).await {
            Ok(value) => Some(format_units(value, graph.usd().decimals, 4)),
            Err(e) => {
                warn!("No USD price for {}: {}", asset, e);
                None
            }
        };
        PriceRow {
            asset,
            in_pivot,
            in_usd,
        }
    });
    let rows = join_all(rows).await;
    debug!("Resolved {} prices", rows.len());
    Ok(rows)
}

pub fn display_prices(rows: &[PriceRow], pivot: &Asset) {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell("Decimals"),
        ui::header_cell(&format!("Price ({pivot})")),
        ui::header_cell("Price (USD)"),
    ]);
    for row in rows {
        table.add_row(vec![
            comfy_table::Cell::new(&row.asset.symbol),
            ui::amount_cell(row.asset.decimals.to_string()),
            ui::format_optional_cell(row.in_pivot.clone(), |v| v),
            ui::format_optional_cell(row.in_usd.clone(), |v| format!("${v}")),
        ]);
    }
    println!("{}", ui::style_text("Asset prices", ui::StyleType::Title));
    println!("{table}");
}

pub async fn run(config: &AppConfig) -> Result<()> {
    let graph = config.price_graph().await?;
    let rows = resolve_prices(config, &graph).await?;
    display_prices(&rows, graph.pivot());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
fund:
  name: "Test"
  symbol: "TST"
  pivot: "WETH"
  usd: "USD"
  treasury: "treasury"
  fee_asset: "WETH"
assets:
  - symbol: "WETH"
    decimals: 18
  - symbol: "USD"
    decimals: 8
  - symbol: "DAI"
    decimals: 18
  - symbol: "LOST"
    decimals: 6
feeds:
  - base: "WETH"
    quote: "USD"
    rate: "2000"
  - base: "DAI"
    quote: "WETH"
    rate: "0.0005"
constituents:
  - asset: "WETH"
    weight: 10000
"#;

    #[tokio::test]
    async fn test_resolve_prices_marks_missing_pairs() {
        let config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        let graph = config.price_graph().await.unwrap();
        let rows = resolve_prices(&config, &graph).await.unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].in_pivot.as_deref(), Some("1"));
        assert_eq!(rows[0].in_usd.as_deref(), Some("2000"));
        assert_eq!(rows[1].in_pivot.as_deref(), Some("0.0005"));
        assert_eq!(rows[2].in_pivot.as_deref(), Some("0.0005"));
        assert_eq!(rows[2].in_usd.as_deref(), Some("1"));
        assert!(rows[3].in_pivot.is_none());
        assert!(rows[3].in_usd.is_none());
    }
}
