//! The fund book: ledger state plus the operations exposed to callers.
//!
//! `FundBook` is the single owner of positions, trade records and SIP plans.
//! Every successful mutation bumps [`FundBook::version`], which observers can
//! poll instead of subscribing to state changes.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::error::LedgerError;
use super::instruction::{
    BuyInstruction, ConvertInstruction, ConvertResult, SellInstruction, SellResult,
    SipInstruction, TradeInstruction, TradeOutcome,
};
use super::ledger::PositionLedger;
use super::operations::{self, default_fund_name};
use super::position::Position;
use super::sip::{PlanRunOutcome, SipPlan, SipScheduler};
use super::trade_record::{TradeRecord, TradeRecordLog};
use crate::ports::market_port::{FundEstimate, NameLookupPort, NoNames};

/// Everything that is persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub positions: PositionLedger,
    pub records: TradeRecordLog,
    pub plans: SipScheduler,
}

pub struct FundBook {
    state: LedgerState,
    names: Box<dyn NameLookupPort>,
    clock: Box<dyn Fn() -> NaiveDate>,
    day_rates: HashMap<String, f64>,
    version: u64,
}

impl Default for FundBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FundBook {
    pub fn new() -> Self {
        Self::from_state(LedgerState::default())
    }

    pub fn from_state(state: LedgerState) -> Self {
        FundBook {
            state,
            names: Box::new(NoNames),
            clock: Box::new(|| Local::now().date_naive()),
            day_rates: HashMap::new(),
            version: 0,
        }
    }

    pub fn with_names(mut self, names: Box<dyn NameLookupPort>) -> Self {
        self.names = names;
        self
    }

    /// Replace the source of "today" used when no date is supplied.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn positions(&self) -> &PositionLedger {
        &self.state.positions
    }

    pub fn position(&self, code: &str) -> Option<&Position> {
        self.state.positions.get(code.trim())
    }

    pub fn records(&self) -> &TradeRecordLog {
        &self.state.records
    }

    pub fn plans(&self) -> &SipScheduler {
        &self.state.plans
    }

    /// Remember the latest daily change for `code`, used by SIP replay.
    pub fn set_day_rate(&mut self, code: &str, rate_pct: f64) {
        if rate_pct.is_finite() {
            self.day_rates.insert(code.trim().to_string(), rate_pct);
        }
    }

    pub fn update_day_rates<'a>(&mut self, estimates: impl IntoIterator<Item = &'a FundEstimate>) {
        for estimate in estimates {
            self.set_day_rate(&estimate.code, estimate.day_change_percent);
        }
    }

    pub fn day_rate(&self, code: &str) -> Option<f64> {
        self.day_rates.get(code.trim()).copied()
    }

    fn resolve_name(&self, code: &str, explicit: Option<&str>) -> String {
        let code = code.trim();
        explicit
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.names.resolve_fund_name(code))
            .unwrap_or_else(|| default_fund_name(code))
    }

    fn named(&self, instruction: TradeInstruction) -> TradeInstruction {
        match instruction {
            TradeInstruction::Buy(mut i) => {
                i.fund_name = Some(self.resolve_name(&i.code, i.fund_name.as_deref()));
                TradeInstruction::Buy(i)
            }
            TradeInstruction::Sell(mut i) => {
                i.fund_name = Some(self.resolve_name(&i.code, i.fund_name.as_deref()));
                TradeInstruction::Sell(i)
            }
            TradeInstruction::Sip(mut i) => {
                i.fund_name = Some(self.resolve_name(&i.code, i.fund_name.as_deref()));
                TradeInstruction::Sip(i)
            }
            TradeInstruction::Convert(mut i) => {
                i.source_name = Some(self.resolve_name(&i.source_code, i.source_name.as_deref()));
                TradeInstruction::Convert(i)
            }
        }
    }

    /// Run one instruction. Rejections leave the book untouched.
    pub fn execute(&mut self, instruction: TradeInstruction) -> Result<TradeOutcome, LedgerError> {
        let instruction = self.named(instruction);
        let result = operations::execute(
            &mut self.state.positions,
            &mut self.state.records,
            &instruction,
        );
        match &result {
            Ok(_) => self.version += 1,
            Err(e) => warn!(code = instruction.code(), error = %e, "trade rejected"),
        }
        result
    }

    pub fn sync_buy_trade(&mut self, instruction: BuyInstruction) -> bool {
        self.execute(TradeInstruction::Buy(instruction)).is_ok()
    }

    pub fn sync_sell_trade(&mut self, instruction: SellInstruction) -> Option<SellResult> {
        match self.execute(TradeInstruction::Sell(instruction)) {
            Ok(TradeOutcome::Sold(result)) => Some(result),
            _ => None,
        }
    }

    pub fn sync_sip_trade(&mut self, instruction: SipInstruction) -> bool {
        self.execute(TradeInstruction::Sip(instruction)).is_ok()
    }

    pub fn sync_convert_trade(&mut self, instruction: ConvertInstruction) -> Option<ConvertResult> {
        match self.execute(TradeInstruction::Convert(instruction)) {
            Ok(TradeOutcome::Converted(result)) => Some(result),
            _ => None,
        }
    }

    /// Register a recurring plan and immediately replay anything already due.
    pub fn add_sip_plan(
        &mut self,
        code: &str,
        fund_name: Option<&str>,
        amount: f64,
        period_text: &str,
        next_run_date: &str,
    ) -> Option<SipPlan> {
        let name = self.resolve_name(code, fund_name);
        let id = match self
            .state
            .plans
            .add_plan(code, &name, amount, period_text, next_run_date)
        {
            Ok(plan) => plan.id,
            Err(e) => {
                warn!(code, error = %e, "sip plan rejected");
                return None;
            }
        };
        self.version += 1;
        debug!(plan_id = id, code, "sip plan added");

        self.run_due_sip_plans(None);
        self.state.plans.get(id).cloned()
    }

    /// Catch up every plan to `today` (the clock's date when `None`).
    pub fn run_due_sip_plans(&mut self, today: Option<NaiveDate>) -> Vec<PlanRunOutcome> {
        let today = today.unwrap_or_else(|| self.today());
        let outcomes = self.state.plans.run_due(
            today,
            &mut self.state.positions,
            &mut self.state.records,
            &self.day_rates,
        );
        if outcomes.iter().any(|o| o.executed > 0) {
            self.version += 1;
        }
        outcomes
    }

    pub fn get_trade_records_by_code(&self, code: &str) -> Vec<&TradeRecord> {
        self.state.records.by_code(code.trim())
    }

    pub fn get_sip_plans_by_code(&self, code: &str) -> Vec<&SipPlan> {
        self.state.plans.plans_by_code(code)
    }

    /// Record an existing holding with known amount and profit.
    pub fn import_position(&mut self, code: &str, amount: f64, profit: f64) -> bool {
        let code = code.trim();
        if code.is_empty() || !amount.is_finite() || amount <= 0.0 || !profit.is_finite() {
            warn!(code, amount, profit, "position import rejected");
            return false;
        }
        let rate = self.day_rate(code);
        self.state.positions.set_position(code, amount, profit, rate);
        self.version += 1;
        true
    }

    pub fn pin_holding(&mut self, code: &str) {
        let code = code.trim();
        if !code.is_empty() {
            self.state.positions.pin(code);
            self.version += 1;
        }
    }

    pub fn unpin_holding(&mut self, code: &str) -> bool {
        let removed = self.state.positions.unpin(code.trim());
        if removed {
            self.version += 1;
        }
        removed
    }
}
