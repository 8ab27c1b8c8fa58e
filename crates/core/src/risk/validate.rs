use super::decision::{Approval, BuyApproval, RiskDecision, SellApproval, Veto};
use crate::config::RiskConfig;
use crate::domain::{MarketSnapshot, PortfolioContext, TradeAction, TradeProposal};
use rust_decimal::Decimal;

/// Validates a trade proposal against portfolio and risk limits.
///
/// BUY sizing order:
/// 1. fixed-fractional risk sizing from the stop distance
/// 2. capped by available cash
/// 3. capped by the per-position limit (auto-reduced)
/// 4. sector exposure limit (veto only, no reduction)
/// 5. volatility filter, checked last so it vetoes regardless of sizing
///
/// SELL closes the full held quantity. HOLD is approved without computation.
///
/// # Arguments
/// * `proposal` - Trade suggested by the recommender
/// * `context` - Portfolio snapshot at decision time
/// * `market` - Market snapshot for `proposal.symbol`
/// * `config` - Risk limits
#[must_use]
pub fn validate(
    proposal: &TradeProposal,
    context: &PortfolioContext,
    market: &MarketSnapshot,
    config: &RiskConfig,
) -> RiskDecision {
    match proposal.action {
        TradeAction::Buy => validate_buy(proposal, context, market, config)
            .map_or_else(RiskDecision::Vetoed, |buy| {
                RiskDecision::Approved(Approval::Buy(buy))
            }),
        TradeAction::Sell => validate_sell(proposal, context, market),
        TradeAction::Hold => RiskDecision::Approved(Approval::Hold),
    }
}

fn validate_buy(
    proposal: &TradeProposal,
    context: &PortfolioContext,
    market: &MarketSnapshot,
    config: &RiskConfig,
) -> Result<BuyApproval, Veto> {
    let symbol = proposal.symbol.as_str();
    let price = market.price;
    let atr = market.atr;

    if price <= Decimal::ZERO {
        return Err(Veto::InvalidPrice {
            symbol: symbol.to_string(),
        });
    }

    let equity = context.equity;
    let risk_amount = equity * config.risk_per_trade_pct;

    let stop_loss = proposal.stop_loss.unwrap_or_else(|| {
        if atr > Decimal::ZERO {
            price - config.stop_loss_atr_multiplier * atr
        } else {
            price * (Decimal::ONE - config.fallback_stop_pct)
        }
    });

    let risk_per_share = price - stop_loss;
    if risk_per_share <= Decimal::ZERO {
        return Err(Veto::InvalidStopLoss { stop_loss, price });
    }

    let mut shares = (risk_amount / risk_per_share).floor();
    if shares < Decimal::ONE {
        return Err(Veto::RiskBudgetTooSmall {
            risk_amount,
            risk_per_share,
        });
    }

    let mut cost = shares * price;
    if cost > context.cash {
        let affordable = (context.cash.max(Decimal::ZERO) / price).floor();
        if affordable < Decimal::ONE {
            return Err(Veto::InsufficientCash {
                needed: cost,
                available: context.cash,
            });
        }
        tracing::info!(
            "Reduced {} from {} to {} shares due to cash constraint",
            symbol,
            shares,
            affordable
        );
        shares = affordable;
        cost = shares * price;
    }

    let existing_value = context.position_value(symbol);
    let max_position = equity * config.max_position_size_pct;
    let max_pct = as_percent(config.max_position_size_pct);
    if existing_value + cost > max_position {
        let room = max_position - existing_value;
        if room < price {
            return Err(Veto::PositionLimit {
                symbol: symbol.to_string(),
                max_pct,
            });
        }
        let fitted = (room / price).floor();
        tracing::info!(
            "Reduced {} from {} to {} shares due to position size limit",
            symbol,
            shares,
            fitted
        );
        shares = fitted;
        cost = shares * price;
    }

    let sector = context.sector_of(symbol);
    let sector_exposure = context.sector_exposure(sector);
    if sector_exposure + cost > equity * config.max_sector_exposure_pct {
        return Err(Veto::SectorLimit {
            sector: sector.to_string(),
            max_pct: as_percent(config.max_sector_exposure_pct),
        });
    }

    let atr_ratio = atr / price;
    if atr_ratio > config.max_volatility_pct {
        return Err(Veto::ExcessiveVolatility {
            atr_pct: as_percent(atr_ratio),
            max_pct: as_percent(config.max_volatility_pct),
        });
    }

    let position_pct = if equity > Decimal::ZERO {
        ((existing_value + cost) / equity * Decimal::ONE_HUNDRED).round_dp(2)
    } else {
        Decimal::ZERO
    };

    Ok(BuyApproval {
        shares,
        cost,
        stop_loss,
        risk_amount,
        position_pct,
    })
}

fn validate_sell(
    proposal: &TradeProposal,
    context: &PortfolioContext,
    market: &MarketSnapshot,
) -> RiskDecision {
    let quantity = context.held_quantity(&proposal.symbol);
    if quantity <= Decimal::ZERO {
        return RiskDecision::Vetoed(Veto::NoPosition {
            symbol: proposal.symbol.clone(),
        });
    }

    RiskDecision::Approved(Approval::Sell(SellApproval {
        shares: quantity,
        value: quantity * market.price,
    }))
}

fn as_percent(fraction: Decimal) -> Decimal {
    (fraction * Decimal::ONE_HUNDRED).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Position;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn market(price: Decimal, atr: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "AAPL".to_string(),
            price,
            atr,
            sma_50: None,
            avg_volume: None,
            source: "test".to_string(),
            observed_at: Utc::now(),
        }
    }

    fn buy() -> TradeProposal {
        TradeProposal::new("AAPL", TradeAction::Buy, 0.8)
    }

    fn held(quantity: Decimal, value: Decimal) -> Position {
        Position {
            quantity,
            cost_basis: value,
            current_value: value,
        }
    }

    fn approved_buy(decision: &RiskDecision) -> &BuyApproval {
        match decision {
            RiskDecision::Approved(Approval::Buy(buy)) => buy,
            other => panic!("expected buy approval, got {other:?}"),
        }
    }

    // =========================================================================
    // BUY sizing
    // =========================================================================

    #[test]
    fn test_atr_stop_sizing_example() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());

        let approval = approved_buy(&decision);
        assert_eq!(approval.stop_loss, dec!(90));
        assert_eq!(approval.risk_amount, dec!(150));
        assert_eq!(approval.shares, dec!(15));
        assert_eq!(approval.cost, dec!(1500));
        assert_eq!(approval.position_pct, dec!(15));
    }

    #[test]
    fn test_excessive_volatility_vetoes() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(12)), &RiskConfig::default());

        let veto = decision.veto().expect("vetoed");
        assert!(matches!(veto, Veto::ExcessiveVolatility { .. }));
        assert_eq!(
            decision.reason(),
            "Excessive volatility. ATR is 12.0% of price (max 10%)"
        );
    }

    #[test]
    fn test_volatility_veto_wins_over_cash_adjustment() {
        // Cash would normally shrink the order; volatility still vetoes.
        let ctx = PortfolioContext::new(dec!(10000), dec!(250));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(11)), &RiskConfig::default());
        assert!(matches!(
            decision.veto(),
            Some(Veto::ExcessiveVolatility { .. })
        ));
    }

    #[test]
    fn test_proposal_stop_is_used() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000));
        let proposal = buy().with_stop_loss(dec!(95));
        let decision = validate(&proposal, &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());

        // $150 risk / $5 per share = 30 shares, capped to 20 by the $2,000 position limit
        let approval = approved_buy(&decision);
        assert_eq!(approval.stop_loss, dec!(95));
        assert_eq!(approval.shares, dec!(20));
        assert_eq!(approval.cost, dec!(2000));
        assert_eq!(approval.position_pct, dec!(20));
    }

    #[test]
    fn test_percentage_stop_without_atr() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000));
        let decision = validate(&buy(), &ctx, &market(dec!(50), dec!(0)), &RiskConfig::default());

        // stop = 47.50, $150 / $2.50 = 60 shares, capped to 40 by the position limit
        let approval = approved_buy(&decision);
        assert_eq!(approval.stop_loss, dec!(47.50));
        assert_eq!(approval.shares, dec!(40));
    }

    #[test]
    fn test_stop_above_price_vetoes() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000));
        let proposal = buy().with_stop_loss(dec!(105));
        let decision = validate(&proposal, &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());
        assert_eq!(
            decision.reason(),
            "Stop loss is above entry price (invalid setup)"
        );
    }

    #[test]
    fn test_invalid_price_vetoes() {
        let ctx = PortfolioContext::default();
        let decision = validate(&buy(), &ctx, &market(dec!(0), dec!(4)), &RiskConfig::default());
        assert_eq!(decision.reason(), "Invalid price data for AAPL");
    }

    #[test]
    fn test_risk_budget_below_one_share_vetoes() {
        // $150 risk against a $250 stop distance never rounds up to one share.
        let ctx = PortfolioContext::new(dec!(10000), dec!(10000));
        let proposal = buy().with_stop_loss(dec!(750));
        let decision = validate(&proposal, &ctx, &market(dec!(1000), dec!(10)), &RiskConfig::default());
        assert!(matches!(
            decision.veto(),
            Some(Veto::RiskBudgetTooSmall { .. })
        ));
    }

    #[test]
    fn test_fractional_risk_floors_exactly() {
        // 0.015 x 10000 must be exactly 150, not 149.999...
        let ctx = PortfolioContext::new(dec!(10000), dec!(10000));
        let proposal = buy().with_stop_loss(dec!(10));
        let decision = validate(&proposal, &ctx, &market(dec!(20), dec!(1)), &RiskConfig::default());
        assert_eq!(approved_buy(&decision).shares, dec!(15));
        assert_eq!(approved_buy(&decision).cost, dec!(300));
    }

    // =========================================================================
    // Cash and position caps
    // =========================================================================

    #[test]
    fn test_cash_cap_reduces_shares() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(730));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());

        let approval = approved_buy(&decision);
        assert_eq!(approval.shares, dec!(7));
        assert!(approval.cost <= ctx.cash);
    }

    #[test]
    fn test_cash_below_one_share_vetoes() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(99.50));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());
        assert_eq!(
            decision.reason(),
            "Insufficient cash. Need $1500.00, have $99.50"
        );
    }

    #[test]
    fn test_existing_position_reduces_to_fit() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000))
            .with_position("AAPL", held(dec!(15), dec!(1500)));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());

        let approval = approved_buy(&decision);
        assert_eq!(approval.shares, dec!(5));
        assert_eq!(approval.position_pct, dec!(20));
    }

    #[test]
    fn test_full_position_cannot_add() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000))
            .with_position("AAPL", held(dec!(20), dec!(1950)));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());
        assert_eq!(
            decision.reason(),
            "Position size limit. AAPL would exceed 20% of portfolio"
        );
    }

    #[test]
    fn test_share_price_above_cap_vetoes_new_position() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(10000));
        let proposal = buy().with_stop_loss(dec!(1));
        let decision = validate(&proposal, &ctx, &market(dec!(2500), dec!(50)), &RiskConfig::default());
        // risk sizing allows 0 shares before the cap is reached
        assert!(!decision.is_approved());

        let generous = RiskConfig {
            risk_per_trade_pct: dec!(0.5),
            ..RiskConfig::default()
        };
        let decision = validate(&proposal, &ctx, &market(dec!(2500), dec!(50)), &generous);
        assert_eq!(
            decision.reason(),
            "Position size limit. AAPL would exceed 20% of portfolio"
        );
    }

    #[test]
    fn test_approvals_respect_cash_and_position_caps() {
        let config = RiskConfig::default();
        let prices = [dec!(3.17), dec!(12.5), dec!(48), dec!(101.25), dec!(333), dec!(990)];
        let cash_levels = [dec!(0), dec!(150), dec!(1234.56), dec!(5000), dec!(20000)];
        let existing = [dec!(0), dec!(400), dec!(1999)];

        for price in prices {
            for cash in cash_levels {
                for value in existing {
                    let mut ctx = PortfolioContext::new(dec!(10000), cash);
                    if value > Decimal::ZERO {
                        ctx = ctx.with_position("AAPL", held(dec!(1), value));
                    }
                    let atr = price * dec!(0.03);
                    let decision = validate(&buy(), &ctx, &market(price, atr), &config);
                    if let RiskDecision::Approved(Approval::Buy(b)) = &decision {
                        assert!(b.shares >= Decimal::ONE);
                        assert!(b.cost <= cash, "cost {} > cash {}", b.cost, cash);
                        assert!(value + b.cost <= dec!(2000));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Sector limit
    // =========================================================================

    #[test]
    fn test_sector_breach_vetoes_without_reducing() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000))
            .with_position("MSFT", held(dec!(10), dec!(3000)))
            .with_sector("MSFT", "Technology")
            .with_sector("AAPL", "Technology");
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());
        assert_eq!(
            decision.reason(),
            "Sector limit. Technology exposure would exceed 40%"
        );
    }

    #[test]
    fn test_unknown_sector_is_unconstrained() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(5000))
            .with_position("MSFT", held(dec!(10), dec!(3900)));
        let decision = validate(&buy(), &ctx, &market(dec!(100), dec!(4)), &RiskConfig::default());
        assert!(decision.is_approved());
    }

    // =========================================================================
    // SELL / HOLD
    // =========================================================================

    #[test]
    fn test_sell_closes_full_position() {
        let ctx = PortfolioContext::new(dec!(10000), dec!(1000))
            .with_position("AAPL", held(dec!(12.5), dec!(1250)));
        let proposal = TradeProposal::new("AAPL", TradeAction::Sell, 0.7);
        let decision = validate(&proposal, &ctx, &market(dec!(110), dec!(4)), &RiskConfig::default());

        assert_eq!(
            decision,
            RiskDecision::Approved(Approval::Sell(SellApproval {
                shares: dec!(12.5),
                value: dec!(1375.0),
            }))
        );
    }

    #[test]
    fn test_sell_without_position_vetoes() {
        let ctx = PortfolioContext::default();
        let proposal = TradeProposal::new("AAPL", TradeAction::Sell, 0.7);
        let decision = validate(&proposal, &ctx, &market(dec!(110), dec!(4)), &RiskConfig::default());
        assert_eq!(decision.reason(), "Cannot sell. No position held.");
    }

    #[test]
    fn test_hold_is_trivially_approved() {
        let proposal = TradeProposal::new("AAPL", TradeAction::Hold, 0.3);
        let decision = validate(
            &proposal,
            &PortfolioContext::default(),
            &market(dec!(-1), dec!(0)),
            &RiskConfig::default(),
        );
        assert_eq!(decision, RiskDecision::Approved(Approval::Hold));
    }
}
