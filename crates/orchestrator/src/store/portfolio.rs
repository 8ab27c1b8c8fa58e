use super::{parse_decimal, Database};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tradepilot_core::{PortfolioContext, Position};

impl Database {
    /// Stores a new portfolio snapshot. Earlier snapshots are kept for history.
    ///
    /// # Errors
    ///
    /// Returns error if any insert fails; the snapshot is written atomically.
    pub async fn save_portfolio(&self, portfolio: &PortfolioContext, source: &str) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp();

        let snapshot_id = sqlx::query(
            r"
            INSERT INTO portfolio_snapshots (total_equity, cash_balance, source, imported_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(portfolio.equity.to_string())
        .bind(portfolio.cash.to_string())
        .bind(source)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (symbol, position) in &portfolio.positions {
            sqlx::query(
                r"
                INSERT INTO holdings (snapshot_id, symbol, quantity, cost_basis, current_value)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(snapshot_id)
            .bind(symbol)
            .bind(position.quantity.to_string())
            .bind(position.cost_basis.to_string())
            .bind(position.current_value.to_string())
            .execute(&mut *tx)
            .await?;
        }

        for (symbol, sector) in &portfolio.sectors {
            sqlx::query(
                r"
                INSERT INTO stock_metadata (symbol, sector, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(symbol) DO UPDATE SET
                    sector = excluded.sector,
                    updated_at = excluded.updated_at
                ",
            )
            .bind(symbol)
            .bind(sector)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(snapshot_id)
    }

    /// Latest portfolio snapshot with sectors from stock metadata, or `None`
    /// if nothing has been imported yet.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn latest_portfolio(&self) -> Result<Option<PortfolioContext>> {
        let Some((snapshot_id, equity, cash)) = sqlx::query_as::<_, (i64, String, String)>(
            r"
            SELECT id, total_equity, cash_balance
            FROM portfolio_snapshots
            ORDER BY imported_at DESC, id DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let mut portfolio = PortfolioContext::new(parse_decimal(&equity)?, parse_decimal(&cash)?);

        let holdings = sqlx::query_as::<_, (String, String, String, String)>(
            r"
            SELECT symbol, quantity, cost_basis, current_value
            FROM holdings
            WHERE snapshot_id = ?1
            ",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;

        for (symbol, quantity, cost_basis, current_value) in holdings {
            portfolio.positions.insert(
                symbol,
                Position {
                    quantity: parse_decimal(&quantity)?,
                    cost_basis: parse_decimal(&cost_basis)?,
                    current_value: parse_decimal(&current_value)?,
                },
            );
        }

        portfolio.sectors = self.sectors().await?;
        Ok(Some(portfolio))
    }

    /// Equity of the most recent snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored value is corrupt.
    pub async fn equity_history(&self, limit: i64) -> Result<Vec<Decimal>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT total_equity FROM portfolio_snapshots ORDER BY imported_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(equity,)| parse_decimal(equity)).collect()
    }

    pub(crate) async fn sectors(&self) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT symbol, sector FROM stock_metadata")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}
