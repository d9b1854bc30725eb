//! Per-instrument position snapshot and its derived figures.

use serde::{Deserialize, Serialize};

/// Share of cumulative profit shown as the day's profit when no rate is known.
pub const FALLBACK_DAY_PROFIT_SHARE: f64 = 0.25;
/// Share of the cumulative profit rate shown as the day's rate when no rate is known.
pub const FALLBACK_DAY_RATE_SHARE: f64 = 0.18;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub code: String,
    pub amount: f64,
    pub profit: f64,
    pub holding_days: u32,
    pub profit_rate: Option<f64>,
    pub day_profit: f64,
    pub day_profit_rate: Option<f64>,
}

impl Position {
    pub fn new(code: &str) -> Self {
        Position {
            code: code.to_string(),
            amount: 0.0,
            profit: 0.0,
            holding_days: 1,
            profit_rate: None,
            day_profit: 0.0,
            day_profit_rate: None,
        }
    }

    /// Amount actually paid in: current value less accumulated profit.
    pub fn principal(&self) -> f64 {
        self.amount - self.profit
    }

    /// Recompute the derived fields from `amount`, `profit` and an optional
    /// daily change rate in percent.
    pub fn refresh_derived(&mut self, day_rate: Option<f64>) {
        self.profit_rate = profit_rate(self.amount, self.profit);
        match day_rate.filter(|r| r.is_finite()) {
            Some(rate) => {
                self.day_profit = day_profit_from_rate(self.amount, rate);
                self.day_profit_rate = Some(rate / 100.0);
            }
            None => {
                self.day_profit = self.profit * FALLBACK_DAY_PROFIT_SHARE;
                self.day_profit_rate = self.profit_rate.map(|r| r * FALLBACK_DAY_RATE_SHARE);
            }
        }
    }

    pub fn profit_rate_label(&self) -> String {
        percent_label(self.profit_rate)
    }

    pub fn day_profit_rate_label(&self) -> String {
        percent_label(self.day_profit_rate)
    }
}

/// `profit / principal` when principal is positive, else `profit / amount`
/// when there is any amount, else undefined.
pub fn profit_rate(amount: f64, profit: f64) -> Option<f64> {
    let principal = amount - profit;
    if principal > 0.0 {
        Some(profit / principal)
    } else if amount > 0.0 {
        Some(profit / amount)
    } else {
        None
    }
}

/// Profit earned today by a holding now worth `amount` after moving `rate_pct`.
pub fn day_profit_from_rate(amount: f64, rate_pct: f64) -> f64 {
    let denominator = 100.0 + rate_pct;
    if denominator <= 0.0 {
        return 0.0;
    }
    amount * rate_pct / denominator
}

/// Rates are fractions; labels render them as percentages, `--` when undefined.
pub fn percent_label(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.2}%", r * 100.0),
        None => "--".to_string(),
    }
}
