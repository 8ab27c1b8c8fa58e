use crate::config::RiskConfig;
use crate::domain::PortfolioContext;
use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionSize {
    pub shares: Decimal,
    pub cost: Decimal,
    pub stop_loss: Decimal,
    pub risk_amount: Decimal,
    pub risk_per_share: Decimal,
    pub position_pct: Decimal,
}

/// Calculate a position size for a prospective entry without vetoing.
///
/// Applies risk-based sizing, then caps by cash and by the position limit. The
/// result may be zero shares.
///
/// # Arguments
/// * `entry_price` - Proposed entry price
/// * `stop_loss` - Explicit stop, or `None` to derive one from `atr`
/// * `atr` - Average true range for the symbol (zero if unknown)
/// * `context` - Portfolio snapshot supplying equity and cash
/// * `config` - Risk limits
///
/// # Errors
/// Returns error if the entry price is not positive or the stop is not below it.
pub fn size_position(
    entry_price: Decimal,
    stop_loss: Option<Decimal>,
    atr: Decimal,
    context: &PortfolioContext,
    config: &RiskConfig,
) -> Result<PositionSize> {
    if entry_price <= Decimal::ZERO {
        anyhow::bail!("Entry price must be positive");
    }

    let equity = context.equity;
    let risk_amount = equity * config.risk_per_trade_pct;
    let stop_loss = stop_loss.unwrap_or_else(|| {
        if atr > Decimal::ZERO {
            entry_price - config.stop_loss_atr_multiplier * atr
        } else {
            entry_price * (Decimal::ONE - config.fallback_stop_pct)
        }
    });

    let risk_per_share = entry_price - stop_loss;
    if risk_per_share <= Decimal::ZERO {
        anyhow::bail!("Stop loss must be below entry price");
    }

    let mut shares = (risk_amount / risk_per_share).floor();
    if shares * entry_price > context.cash {
        shares = (context.cash.max(Decimal::ZERO) / entry_price).floor();
    }

    let max_position = equity * config.max_position_size_pct;
    if shares * entry_price > max_position {
        shares = (max_position.max(Decimal::ZERO) / entry_price).floor();
    }

    let cost = shares * entry_price;
    let position_pct = if equity > Decimal::ZERO {
        (cost / equity * Decimal::ONE_HUNDRED).round_dp(2)
    } else {
        Decimal::ZERO
    };

    Ok(PositionSize {
        shares,
        cost,
        stop_loss,
        risk_amount,
        risk_per_share,
        position_pct,
    })
}

/// Portfolio-level exposure figures reported after each trading day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskSummary {
    pub total_equity: Decimal,
    pub cash: Decimal,
    pub invested: Decimal,
    pub cash_pct: Decimal,
    pub num_positions: usize,
    pub largest_position: Option<String>,
    pub largest_position_pct: Decimal,
    pub max_position_pct: Decimal,
    pub risk_per_trade_pct: Decimal,
}

#[must_use]
pub fn risk_summary(context: &PortfolioContext, config: &RiskConfig) -> RiskSummary {
    let equity = context.equity;
    let pct_of_equity = |value: Decimal| {
        if equity > Decimal::ZERO {
            (value / equity * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        }
    };

    let largest = context
        .holdings()
        .max_by(|(_, a), (_, b)| a.current_value.cmp(&b.current_value));

    RiskSummary {
        total_equity: equity,
        cash: context.cash,
        invested: equity - context.cash,
        cash_pct: pct_of_equity(context.cash),
        num_positions: context.holdings().count(),
        largest_position: largest.map(|(symbol, _)| symbol.to_string()),
        largest_position_pct: largest.map_or(Decimal::ZERO, |(_, p)| pct_of_equity(p.current_value)),
        max_position_pct: (config.max_position_size_pct * Decimal::ONE_HUNDRED).normalize(),
        risk_per_trade_pct: (config.risk_per_trade_pct * Decimal::ONE_HUNDRED).normalize(),
    }
}
