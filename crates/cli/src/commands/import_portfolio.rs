//! Brokerage CSV import command.

use super::common::{open_database, CommonArgs};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tradepilot_core::ConfigLoader;
use tradepilot_orchestrator::import::import_portfolio_file;

/// Arguments for the import-portfolio command.
#[derive(Args, Debug, Clone)]
pub struct ImportPortfolioArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// CSV export with symbol, quantity, cost basis and current value columns
    pub file: PathBuf,
}

/// # Errors
/// Returns an error if the file cannot be parsed or the snapshot cannot be saved.
pub async fn run_import_portfolio(args: ImportPortfolioArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.common.config)?;
    let db = open_database(&config.database).await?;

    let (snapshot_id, portfolio) = import_portfolio_file(&db, &args.file).await?;

    println!("Imported snapshot {} from {}", snapshot_id, args.file.display());
    println!(
        "{:<10} {:>12} {:>14} {:>14}",
        "Symbol", "Quantity", "Cost Basis", "Value"
    );
    println!("{}", "-".repeat(53));
    for (symbol, position) in portfolio.holdings() {
        println!(
            "{:<10} {:>12} {:>14} {:>14}",
            symbol,
            position.quantity,
            position.cost_basis.round_dp(2),
            position.current_value.round_dp(2)
        );
    }
    println!("{}", "-".repeat(53));
    println!("Cash:   ${}", portfolio.cash.round_dp(2));
    println!("Equity: ${}", portfolio.equity.round_dp(2));

    Ok(())
}
