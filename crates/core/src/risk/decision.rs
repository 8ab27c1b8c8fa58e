use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Outcome of validating one trade proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RiskDecision {
    Approved(Approval),
    Vetoed(Veto),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum Approval {
    Buy(BuyApproval),
    Sell(SellApproval),
    Hold,
}

/// A sized entry. `shares` is always at least one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuyApproval {
    pub shares: Decimal,
    pub cost: Decimal,
    pub stop_loss: Decimal,
    pub risk_amount: Decimal,
    /// Position value after the trade as a percentage of equity.
    pub position_pct: Decimal,
}

/// Closing the full held quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellApproval {
    pub shares: Decimal,
    pub value: Decimal,
}

/// Why a proposal was rejected. `Display` yields the user-facing reason.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Veto {
    #[error("Invalid price data for {symbol}")]
    InvalidPrice { symbol: String },

    #[error("Stop loss is above entry price (invalid setup)")]
    InvalidStopLoss { stop_loss: Decimal, price: Decimal },

    #[error("Position size too small (risk allows less than 1 share)")]
    RiskBudgetTooSmall { risk_amount: Decimal, risk_per_share: Decimal },

    #[error("Insufficient cash. Need ${needed:.2}, have ${available:.2}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Position size limit. {symbol} would exceed {max_pct}% of portfolio")]
    PositionLimit { symbol: String, max_pct: Decimal },

    #[error("Sector limit. {sector} exposure would exceed {max_pct}%")]
    SectorLimit { sector: String, max_pct: Decimal },

    #[error("Excessive volatility. ATR is {atr_pct:.1}% of price (max {max_pct}%)")]
    ExcessiveVolatility { atr_pct: Decimal, max_pct: Decimal },

    #[error("Cannot sell. No position held.")]
    NoPosition { symbol: String },

    #[error("Market data for {symbol} is stale ({age_hours}h old, limit {ttl_hours}h)")]
    StaleMarketData {
        symbol: String,
        age_hours: i64,
        ttl_hours: i64,
    },
}

impl RiskDecision {
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }

    /// Human-readable explanation, suitable for the audit log.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Approved(Approval::Buy(buy)) => format!(
                "Approved: {} shares, {}% of portfolio",
                buy.shares,
                buy.position_pct.round_dp(1)
            ),
            Self::Approved(Approval::Sell(sell)) => {
                format!("Approved: close {} shares", sell.shares)
            }
            Self::Approved(Approval::Hold) => "No action required".to_string(),
            Self::Vetoed(veto) => veto.to_string(),
        }
    }

    #[must_use]
    pub fn approved_shares(&self) -> Decimal {
        match self {
            Self::Approved(Approval::Buy(buy)) => buy.shares,
            Self::Approved(Approval::Sell(sell)) => sell.shares,
            _ => Decimal::ZERO,
        }
    }

    /// Cash committed by a BUY approval; zero otherwise.
    #[must_use]
    pub fn approved_cost(&self) -> Decimal {
        match self {
            Self::Approved(Approval::Buy(buy)) => buy.cost,
            _ => Decimal::ZERO,
        }
    }

    #[must_use]
    pub const fn veto(&self) -> Option<&Veto> {
        match self {
            Self::Vetoed(veto) => Some(veto),
            Self::Approved(_) => None,
        }
    }
}

impl From<Veto> for RiskDecision {
    fn from(veto: Veto) -> Self {
        Self::Vetoed(veto)
    }
}
