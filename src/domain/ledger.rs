//! Keyed store of position snapshots.
//!
//! At most one position exists per instrument code. A position whose amount
//! drops to zero is removed unless the surrounding application still lists the
//! code as a holding (see [`PositionLedger::pin`]).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::position::Position;

/// Value left below half a cent after a reduction counts as fully liquidated.
pub const DUST_AMOUNT: f64 = 0.005;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
    #[serde(default)]
    holding_refs: BTreeSet<String>,
}

/// Proportional profit rescale on partial liquidation: realized profit is
/// assumed to follow the fraction of value removed.
pub fn rescale_profit(profit: f64, amount_before: f64, amount_after: f64) -> f64 {
    if amount_before <= 0.0 {
        return 0.0;
    }
    profit * (amount_after / amount_before)
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from stored positions and pinned codes.
    pub fn from_parts(
        positions: impl IntoIterator<Item = Position>,
        pinned: impl IntoIterator<Item = String>,
    ) -> Self {
        PositionLedger {
            positions: positions
                .into_iter()
                .map(|p| (p.code.clone(), p))
                .collect(),
            holding_refs: pinned.into_iter().collect(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&Position> {
        self.positions.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.positions.contains_key(code)
    }

    /// Current amount for `code`, zero when absent.
    pub fn amount_of(&self, code: &str) -> f64 {
        self.positions.get(code).map_or(0.0, |p| p.amount)
    }

    pub fn profit_of(&self, code: &str) -> f64 {
        self.positions.get(code).map_or(0.0, |p| p.profit)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Create an empty position for `code` if none exists.
    pub fn ensure(&mut self, code: &str) -> &mut Position {
        self.positions
            .entry(code.to_string())
            .or_insert_with(|| Position::new(code))
    }

    /// Apply an amount delta and replace the profit.
    ///
    /// Returns the updated position, or `None` when it was removed because the
    /// amount reached zero and nothing else references the code.
    pub fn apply(
        &mut self,
        code: &str,
        delta_amount: f64,
        new_profit: f64,
        day_rate: Option<f64>,
    ) -> Option<&Position> {
        let current = self.amount_of(code);
        self.store(code, current + delta_amount, new_profit, day_rate)
    }

    /// Overwrite a position with known figures, as when importing an
    /// existing holding. Holding days carry over when the position exists.
    pub fn set_position(
        &mut self,
        code: &str,
        amount: f64,
        profit: f64,
        day_rate: Option<f64>,
    ) -> Option<&Position> {
        self.store(code, amount, profit, day_rate)
    }

    fn store(
        &mut self,
        code: &str,
        amount: f64,
        profit: f64,
        day_rate: Option<f64>,
    ) -> Option<&Position> {
        // Dust only collapses on a reduction; small deposits are kept.
        let reduced = amount < self.amount_of(code);
        let amount = if amount <= 0.0 || (reduced && amount < DUST_AMOUNT) {
            0.0
        } else {
            amount
        };
        if amount == 0.0 && !self.is_pinned(code) {
            self.positions.remove(code);
            return None;
        }
        let position = self.ensure(code);
        position.amount = amount;
        position.profit = if amount == 0.0 { 0.0 } else { profit };
        position.refresh_derived(day_rate);
        Some(&*position)
    }

    /// Record that a holding list still references `code`.
    pub fn pin(&mut self, code: &str) {
        self.holding_refs.insert(code.to_string());
    }

    /// Drop the holding-list reference and clear any empty residue.
    pub fn unpin(&mut self, code: &str) -> bool {
        let removed = self.holding_refs.remove(code);
        if self.positions.get(code).is_some_and(|p| p.amount == 0.0) {
            self.positions.remove(code);
        }
        removed
    }

    pub fn is_pinned(&self, code: &str) -> bool {
        self.holding_refs.contains(code)
    }

    pub fn pinned_codes(&self) -> impl Iterator<Item = &str> {
        self.holding_refs.iter().map(String::as_str)
    }

    pub fn total_amount(&self) -> f64 {
        self.positions.values().map(|p| p.amount).sum()
    }

    pub fn total_profit(&self) -> f64 {
        self.positions.values().map(|p| p.profit).sum()
    }

    pub fn total_day_profit(&self) -> f64 {
        self.positions.values().map(|p| p.day_profit).sum()
    }

    /// Fraction of the whole book held in `code`.
    pub fn position_ratio(&self, code: &str) -> Option<f64> {
        let total = self.total_amount();
        if total <= 0.0 {
            return None;
        }
        self.positions.get(code).map(|p| p.amount / total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ledger_is_empty() {
        let ledger = PositionLedger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.len(), 0);
        assert!((ledger.amount_of("001467") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn apply_creates_and_accumulates() {
        let mut ledger = PositionLedger::new();
        ledger.apply("001467", 1000.0, 0.0, None);
        ledger.apply("001467", 500.0, 20.0, None);

        let pos = ledger.get("001467").unwrap();
        assert!((pos.amount - 1500.0).abs() < f64::EPSILON);
        assert!((pos.profit - 20.0).abs() < f64::EPSILON);
        assert!(pos.profit_rate.is_some());
    }

    #[test]
    fn apply_clamps_and_deletes_at_zero() {
        let mut ledger = PositionLedger::new();
        ledger.apply("001467", 100.0, 5.0, None);
        let result = ledger.apply("001467", -250.0, 5.0, None);
        assert!(result.is_none());
        assert!(!ledger.contains("001467"));
    }

    #[test]
    fn dust_counts_as_zero() {
        let mut ledger = PositionLedger::new();
        ledger.apply("001467", 100.0, 0.0, None);
        ledger.apply("001467", -99.999, 0.0, None);
        assert!(!ledger.contains("001467"));
    }

    #[test]
    fn small_deposit_is_kept() {
        let mut ledger = PositionLedger::new();
        let pos = ledger.apply("001467", 0.004, 0.0, None).unwrap();
        assert!((pos.amount - 0.004).abs() < f64::EPSILON);

        ledger.apply("001467", 0.002, 0.0, None);
        assert!((ledger.amount_of("001467") - 0.006).abs() < 1e-12);

        ledger.apply("001467", -0.0055, 0.0, None);
        assert!(!ledger.contains("001467"));
    }

    #[test]
    fn pinned_code_keeps_zero_position() {
        let mut ledger = PositionLedger::new();
        ledger.pin("001467");
        ledger.apply("001467", 100.0, 10.0, None);
        let pos = ledger.apply("001467", -100.0, 10.0, None).unwrap();
        assert!((pos.amount - 0.0).abs() < f64::EPSILON);
        assert!((pos.profit - 0.0).abs() < f64::EPSILON);
        assert!(pos.profit_rate.is_none());

        assert!(ledger.unpin("001467"));
        assert!(!ledger.contains("001467"));
    }

    #[test]
    fn unpin_keeps_funded_position() {
        let mut ledger = PositionLedger::new();
        ledger.pin("017811");
        ledger.apply("017811", 300.0, 0.0, None);
        ledger.unpin("017811");
        assert!(ledger.contains("017811"));
        assert!(!ledger.is_pinned("017811"));
    }

    #[test]
    fn set_position_preserves_holding_days() {
        let mut ledger = PositionLedger::new();
        ledger.ensure("017811").holding_days = 96;
        let pos = ledger.set_position("017811", 18200.0, 1266.2, None).unwrap();
        assert_eq!(pos.holding_days, 96);
        assert!((pos.amount - 18200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rescale_profit_proportional() {
        assert!((rescale_profit(100.0, 1000.0, 400.0) - 40.0).abs() < 1e-12);
        assert!((rescale_profit(-60.0, 600.0, 300.0) - (-30.0)).abs() < 1e-12);
        assert!((rescale_profit(50.0, 0.0, 0.0) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn totals_and_ratio() {
        let mut ledger = PositionLedger::new();
        ledger.apply("A", 300.0, 30.0, None);
        ledger.apply("B", 100.0, -10.0, None);

        assert!((ledger.total_amount() - 400.0).abs() < f64::EPSILON);
        assert!((ledger.total_profit() - 20.0).abs() < f64::EPSILON);
        assert!((ledger.position_ratio("A").unwrap() - 0.75).abs() < 1e-12);
        assert!(ledger.position_ratio("C").is_none());
    }

    #[test]
    fn ratio_undefined_for_empty_book() {
        let ledger = PositionLedger::new();
        assert!(ledger.position_ratio("A").is_none());
    }

    #[test]
    fn iter_is_ordered_by_code() {
        let mut ledger = PositionLedger::new();
        ledger.apply("B", 1.0, 0.0, None);
        ledger.apply("A", 1.0, 0.0, None);
        let codes: Vec<_> = ledger.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);
    }
}
