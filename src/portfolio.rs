//! Portfolio-level aggregation: a pure fold over the current asset set.
//!
//! Holds no incremental state; re-run on every asset-set change. Unmapped
//! assets contribute to invested totals via cost basis but never to value or
//! profit figures. All percentage fields are ratios and defined as zero when
//! their denominator is zero.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Asset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    /// Currency all totals are expressed in. Conversion is an upstream
    /// concern; values are folded as-is.
    pub base_currency: String,
    pub total_value: Decimal,
    pub total_invested: Decimal,
    pub total_profit_loss: Decimal,
    pub total_profit_loss_pct: Decimal,
    pub total_profit_loss_realized: Decimal,
    pub total_profit_loss_unrealized: Decimal,
}

impl PortfolioTotals {
    pub fn empty(base_currency: impl Into<String>) -> Self {
        Self {
            base_currency: base_currency.into(),
            total_value: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            total_profit_loss: Decimal::ZERO,
            total_profit_loss_pct: Decimal::ZERO,
            total_profit_loss_realized: Decimal::ZERO,
            total_profit_loss_unrealized: Decimal::ZERO,
        }
    }
}

pub fn aggregate(assets: &[Asset], realized_profit_loss: Decimal, base_currency: &str) -> PortfolioTotals {
    let mut totals = PortfolioTotals::empty(base_currency);
    totals.total_profit_loss_realized = realized_profit_loss;

    let mut mapped_invested = Decimal::ZERO;
    for asset in assets {
        totals.total_invested += asset.invested();
        if let Some(market_value) = asset.market_value {
            totals.total_value += market_value;
            mapped_invested += asset.invested();
        }
        if let Some(profit_loss) = asset.profit_loss_abs {
            totals.total_profit_loss_unrealized += profit_loss;
        }
    }

    totals.total_profit_loss = totals.total_value - mapped_invested;
    totals.total_profit_loss_pct = if totals.total_invested > Decimal::ZERO {
        totals.total_profit_loss / totals.total_invested
    } else {
        Decimal::ZERO
    };

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetType;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn asset(symbol: &str, qty: &str, avg: &str, price: Option<&str>) -> Asset {
        let quantity = d(qty);
        let avg_buy_price = d(avg);
        let current_price = price.map(d);
        let market_value = current_price.map(|p| p * quantity);
        let profit_loss_abs = current_price.map(|p| (p - avg_buy_price) * quantity);
        Asset {
            broker: "b".to_string(),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            asset_type: AssetType::Equity,
            quantity,
            avg_buy_price,
            currency: "USD".to_string(),
            current_price,
            market_value,
            profit_loss_abs,
            profit_loss_pct: Decimal::ZERO,
            unmapped: price.is_none(),
            manual_type: false,
            integrity_flagged: false,
            last_price_update: None,
            transactions: Vec::new(),
        }
    }

    #[test]
    fn empty_asset_set_is_all_zero() {
        let totals = aggregate(&[], Decimal::ZERO, "EUR");
        assert_eq!(totals, PortfolioTotals::empty("EUR"));
    }

    #[test]
    fn unmapped_assets_count_toward_invested_only() {
        let assets = vec![
            asset("AAPL", "10", "150", Some("155")),
            asset("XYZ", "5", "20", None),
        ];
        let totals = aggregate(&assets, Decimal::ZERO, "EUR");

        assert_eq!(totals.total_value, d("1550"));
        assert_eq!(totals.total_invested, d("1600"));
        // Profit is computed on the mapped contribution only.
        assert_eq!(totals.total_profit_loss, d("50"));
        assert_eq!(totals.total_profit_loss_unrealized, d("50"));
    }

    #[test]
    fn realized_figure_is_carried_through() {
        let assets = vec![asset("AAPL", "10", "150", Some("155"))];
        let totals = aggregate(&assets, d("120"), "USD");
        assert_eq!(totals.total_profit_loss_realized, d("120"));
        assert_eq!(totals.total_profit_loss_unrealized, d("50"));
    }

    #[test]
    fn pct_is_zero_when_nothing_invested() {
        let totals = aggregate(&[asset("FREE", "1", "0", Some("10"))], Decimal::ZERO, "USD");
        assert_eq!(totals.total_profit_loss_pct, Decimal::ZERO);
        assert_eq!(totals.total_profit_loss, d("10"));
    }
}
