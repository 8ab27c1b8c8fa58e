//! Brokerage CSV import into a new portfolio snapshot.
//!
//! Expected header: `symbol,quantity,cost_basis,current_value,sector`. Cash
//! and money-market rows (`CASH`, `SPAXX`, `CORE`, `FDRXX`, `FCASH*`) are
//! summed into the cash balance using their `current_value`.

use crate::store::Database;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tradepilot_core::{PortfolioContext, Position};

const CASH_SYMBOLS: [&str; 4] = ["CASH", "SPAXX", "CORE", "FDRXX"];

#[derive(Debug, Deserialize)]
struct HoldingRow {
    symbol: String,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    cost_basis: String,
    #[serde(default)]
    current_value: String,
    #[serde(default)]
    sector: Option<String>,
}

fn is_cash(symbol: &str) -> bool {
    let base = symbol.trim_end_matches('*');
    CASH_SYMBOLS.contains(&base) || base.starts_with("FCASH")
}

/// Parses `$1,234.56`, `+12`, `--` and blanks (zero).
fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '+'))
        .collect();
    if cleaned.is_empty() || cleaned == "--" {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(&cleaned).with_context(|| format!("Invalid amount '{raw}'"))
}

/// Reads holdings and cash from CSV. Equity is holdings value plus cash.
///
/// # Errors
/// Returns error if a row is malformed or an amount cannot be parsed.
pub fn parse_portfolio_csv<R: Read>(reader: R) -> Result<PortfolioContext> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut cash = Decimal::ZERO;
    let mut holdings = Vec::new();

    for (line, row) in csv.deserialize::<HoldingRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed CSV row {}", line + 2))?;
        let symbol = row.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            continue;
        }

        let current_value = parse_amount(&row.current_value)
            .with_context(|| format!("Row {} ({symbol})", line + 2))?;
        if is_cash(&symbol) {
            cash += current_value;
            continue;
        }

        let position = Position {
            quantity: parse_amount(&row.quantity)?,
            cost_basis: parse_amount(&row.cost_basis)?,
            current_value,
        };
        holdings.push((symbol, position, row.sector.filter(|s| !s.is_empty())));
    }

    let invested: Decimal = holdings.iter().map(|(_, p, _)| p.current_value).sum();
    let mut portfolio = PortfolioContext::new(invested + cash, cash);
    for (symbol, position, sector) in holdings {
        if let Some(sector) = sector {
            portfolio = portfolio.with_sector(&symbol, &sector);
        }
        portfolio = portfolio.with_position(&symbol, position);
    }
    Ok(portfolio)
}

/// Imports a CSV file as the latest portfolio snapshot.
///
/// # Returns
/// The new snapshot id and the parsed portfolio.
///
/// # Errors
/// Returns error if the file cannot be read or parsed, or the snapshot
/// cannot be stored.
pub async fn import_portfolio_file(db: &Database, path: &Path) -> Result<(i64, PortfolioContext)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let portfolio = parse_portfolio_csv(file)?;

    let source = path
        .file_name()
        .map_or_else(|| "csv".to_string(), |name| name.to_string_lossy().into_owned());
    let snapshot_id = db.save_portfolio(&portfolio, &source).await?;

    tracing::info!(
        "Imported snapshot {} from {}: {} holdings, equity ${:.2}, cash ${:.2}",
        snapshot_id,
        source,
        portfolio.holdings().count(),
        portfolio.equity,
        portfolio.cash
    );
    Ok((snapshot_id, portfolio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const SAMPLE: &str = "\
symbol,quantity,cost_basis,current_value,sector
AAPL,10,\"$1,500.00\",\"$1,800.00\",Technology
xom,5,400,450,
SPAXX**,,,\"$2,000.00\",
CASH,,,250,
";

    #[test]
    fn test_parse_sums_cash_and_equity() {
        let portfolio = parse_portfolio_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(portfolio.cash, dec!(2250));
        assert_eq!(portfolio.equity, dec!(4500));
        assert_eq!(portfolio.held_quantity("AAPL"), dec!(10));
        assert_eq!(portfolio.position_value("XOM"), dec!(450));
        assert_eq!(portfolio.sector_of("AAPL"), "Technology");
        assert_eq!(portfolio.sector_of("XOM"), "Unknown");
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("$1,234.50").unwrap(), dec!(1234.50));
        assert_eq!(parse_amount("+12").unwrap(), dec!(12));
        assert_eq!(parse_amount("--").unwrap(), Decimal::ZERO);
        assert_eq!(parse_amount("").unwrap(), Decimal::ZERO);
        assert!(parse_amount("n/a").is_err());
    }

    #[tokio::test]
    async fn test_import_file_becomes_latest_snapshot() {
        let db = Database::in_memory().await.unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let (id, _) = import_portfolio_file(&db, file.path()).await.unwrap();
        assert!(id > 0);

        let latest = db.latest_portfolio().await.unwrap().unwrap();
        assert_eq!(latest.equity, dec!(4500));
        assert_eq!(latest.sector_of("AAPL"), "Technology");
    }
}
