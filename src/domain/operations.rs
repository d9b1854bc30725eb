//! Buy, sell, SIP and convert against a position ledger and trade log.
//!
//! Every operation validates its whole input before touching state, so a
//! rejected instruction leaves the ledger and the log exactly as they were.
//!
//! Sell and convert-out rescale profit in proportion to the value removed
//! (see [`rescale_profit`]). This is a known approximation, not cost-basis
//! accounting.

use tracing::debug;

use super::calendar::{
    TradeTiming, occurred_at, resolve_buy_timing, resolve_convert_timing, resolve_sell_timing,
    resolve_sip_timing, sip_occurred_at,
};
use super::error::LedgerError;
use super::instruction::{
    BuyInstruction, ConvertInstruction, ConvertResult, SellInstruction, SellResult,
    SipInstruction, TradeInstruction, TradeOutcome,
};
use super::ledger::{PositionLedger, rescale_profit};
use super::trade_record::{NewTradeRecord, TradeDirection, TradeRecordLog, TradeType, TradeUnit};

/// Sells smaller than half of 0.01 share round to nothing and are rejected.
pub const MIN_SELL_SHARE: f64 = 0.005;

/// Placeholder shown when no name is known for a code.
pub fn default_fund_name(code: &str) -> String {
    format!("基金{code}")
}

fn display_name(name: Option<&str>, code: &str) -> String {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map_or_else(|| default_fund_name(code), str::to_string)
}

fn require_code<'a>(code: &'a str, field: &str) -> Result<&'a str, LedgerError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

fn require_positive(value: f64, field: &str) -> Result<f64, LedgerError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LedgerError::invalid(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(value)
}

/// Add `amount` of currency to a position, creating it when absent.
pub fn buy(
    ledger: &mut PositionLedger,
    log: &mut TradeRecordLog,
    instruction: &BuyInstruction,
) -> Result<TradeTiming, LedgerError> {
    let code = require_code(&instruction.code, "code")?;
    let amount = require_positive(instruction.amount, "amount")?;

    let timing = resolve_buy_timing(instruction.requested_at.date(), instruction.slot);
    let profit = ledger.profit_of(code);
    ledger.apply(code, amount, profit, instruction.day_rate);

    let record = log.append(NewTradeRecord {
        code: code.to_string(),
        fund_name: display_name(instruction.fund_name.as_deref(), code),
        trade_type: TradeType::Buy,
        direction: TradeDirection::Buy,
        amount,
        unit: TradeUnit::Currency,
        request_date: timing.request_date,
        trade_date: timing.trade_date,
        confirm_date: timing.confirm_date,
        occurred_at: occurred_at(instruction.requested_at, instruction.slot),
    });
    debug!(code, amount, record_id = record.id, trade_date = %timing.trade_date, "buy applied");

    Ok(timing)
}

/// Redeem shares at `nav`, capped at what the position is worth.
pub fn sell(
    ledger: &mut PositionLedger,
    log: &mut TradeRecordLog,
    instruction: &SellInstruction,
) -> Result<SellResult, LedgerError> {
    let code = require_code(&instruction.code, "code")?;
    let share = require_positive(instruction.share, "share")?;
    let nav = require_positive(instruction.nav, "nav")?;

    let amount = ledger.amount_of(code);
    if amount <= 0.0 {
        return Err(LedgerError::InsufficientPosition {
            code: code.to_string(),
        });
    }

    let max_sell_share = amount / nav;
    let sold_share = share.min(max_sell_share);
    if sold_share < MIN_SELL_SHARE {
        return Err(LedgerError::invalid(format!(
            "sell of {sold_share} shares of {code} rounds to zero"
        )));
    }

    let sold_amount = sold_share * nav;
    let next_amount = (amount - sold_amount).max(0.0);
    let next_profit = rescale_profit(ledger.profit_of(code), amount, next_amount);
    ledger.set_position(code, next_amount, next_profit, instruction.day_rate);

    let timing = resolve_sell_timing(instruction.requested_at.date(), instruction.slot);
    let record = log.append(NewTradeRecord {
        code: code.to_string(),
        fund_name: display_name(instruction.fund_name.as_deref(), code),
        trade_type: TradeType::Sell,
        direction: TradeDirection::Sell,
        amount: sold_share,
        unit: TradeUnit::Share,
        request_date: timing.timing.request_date,
        trade_date: timing.timing.trade_date,
        confirm_date: timing.timing.confirm_date,
        occurred_at: occurred_at(instruction.requested_at, instruction.slot),
    });
    debug!(code, sold_share, sold_amount, record_id = record.id, "sell applied");

    Ok(SellResult {
        sold_share,
        sold_amount,
        max_sell_share,
        remaining_amount: ledger.amount_of(code),
        timing,
    })
}

/// One recurring contribution. Timing follows the fixed daily cutoff.
pub fn sip(
    ledger: &mut PositionLedger,
    log: &mut TradeRecordLog,
    instruction: &SipInstruction,
) -> Result<TradeTiming, LedgerError> {
    let code = require_code(&instruction.code, "code")?;
    let amount = require_positive(instruction.amount, "amount")?;

    let timing = resolve_sip_timing(instruction.requested_at.date());
    let profit = ledger.profit_of(code);
    ledger.apply(code, amount, profit, instruction.day_rate);

    let record = log.append(NewTradeRecord {
        code: code.to_string(),
        fund_name: display_name(instruction.fund_name.as_deref(), code),
        trade_type: TradeType::Sip,
        direction: TradeDirection::Buy,
        amount,
        unit: TradeUnit::Currency,
        request_date: timing.request_date,
        trade_date: timing.trade_date,
        confirm_date: timing.confirm_date,
        occurred_at: sip_occurred_at(timing.request_date),
    });
    debug!(code, amount, record_id = record.id, trade_date = %timing.trade_date, "sip applied");

    Ok(timing)
}

/// Move value from one instrument to another.
///
/// Only the outgoing leg is logged. The incoming amount lands on the target
/// as fresh principal, leaving the target's profit untouched.
pub fn convert(
    ledger: &mut PositionLedger,
    log: &mut TradeRecordLog,
    instruction: &ConvertInstruction,
) -> Result<ConvertResult, LedgerError> {
    let source = require_code(&instruction.source_code, "source code")?;
    let target = require_code(&instruction.target_code, "target code")?;
    if source == target {
        return Err(LedgerError::invalid(format!(
            "cannot convert {source} into itself"
        )));
    }
    let out_amount = require_positive(instruction.out_amount, "out amount")?;
    let in_amount = require_positive(instruction.in_amount, "in amount")?;

    let source_amount = ledger.amount_of(source);
    if source_amount <= 0.0 {
        return Err(LedgerError::InsufficientPosition {
            code: source.to_string(),
        });
    }

    let actual_out_amount = out_amount.min(source_amount);
    let source_next = source_amount - actual_out_amount;
    let source_profit = rescale_profit(ledger.profit_of(source), source_amount, source_next);
    ledger.set_position(source, source_next, source_profit, instruction.source_day_rate);

    let target_profit = ledger.profit_of(target);
    ledger.apply(target, in_amount, target_profit, instruction.target_day_rate);

    let timing = resolve_convert_timing(instruction.requested_at.date(), instruction.slot);
    let record = log.append(NewTradeRecord {
        code: source.to_string(),
        fund_name: display_name(instruction.source_name.as_deref(), source),
        trade_type: TradeType::Convert,
        direction: TradeDirection::Sell,
        amount: actual_out_amount,
        unit: TradeUnit::Currency,
        request_date: timing.request_date,
        trade_date: timing.trade_date,
        confirm_date: timing.confirm_date,
        occurred_at: occurred_at(instruction.requested_at, instruction.slot),
    });
    debug!(
        source,
        target,
        actual_out_amount,
        in_amount,
        record_id = record.id,
        "convert applied"
    );

    Ok(ConvertResult {
        actual_out_amount,
        in_amount,
        source_remaining: ledger.amount_of(source),
        target_amount: ledger.amount_of(target),
        timing,
    })
}

pub fn execute(
    ledger: &mut PositionLedger,
    log: &mut TradeRecordLog,
    instruction: &TradeInstruction,
) -> Result<TradeOutcome, LedgerError> {
    match instruction {
        TradeInstruction::Buy(i) => buy(ledger, log, i).map(TradeOutcome::Bought),
        TradeInstruction::Sell(i) => sell(ledger, log, i).map(TradeOutcome::Sold),
        TradeInstruction::Sip(i) => sip(ledger, log, i).map(TradeOutcome::Invested),
        TradeInstruction::Convert(i) => convert(ledger, log, i).map(TradeOutcome::Converted),
    }
}
