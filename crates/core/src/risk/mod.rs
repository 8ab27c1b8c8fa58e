//! Risk validation for trade proposals.
//!
//! [`validate`] is a pure, total function: every proposal yields a
//! [`RiskDecision`], business-rule violations are vetoes rather than errors.
//! [`RiskController`] wraps it with staleness checks and the audit trail.

mod controller;
mod decision;
mod sizing;
mod validate;

pub use controller::{DecisionAudit, RiskController};
pub use decision::{Approval, BuyApproval, RiskDecision, SellApproval, Veto};
pub use sizing::{risk_summary, size_position, PositionSize, RiskSummary};
pub use validate::validate;
