//! Trading calendar and settlement-date resolution.
//!
//! A trading day is any Monday to Friday; holidays are not modeled. All
//! arithmetic is on calendar dates, so time-of-day never affects a result.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;

/// Daily cutoff: instructions at or after this local time miss the day.
pub const CUTOFF_HOUR: u32 = 15;

const BEFORE_CLOSE_DISPLAY: (u32, u32) = (14, 30);
const AFTER_CLOSE_DISPLAY: (u32, u32) = (15, 30);

/// Whether an instruction was submitted before or after the daily cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeTimeSlot {
    BeforeClose,
    #[default]
    AfterClose,
}

impl TradeTimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeTimeSlot::BeforeClose => "before-close",
            TradeTimeSlot::AfterClose => "after-close",
        }
    }

    fn display_time(&self) -> NaiveTime {
        let (h, m) = match self {
            TradeTimeSlot::BeforeClose => BEFORE_CLOSE_DISPLAY,
            TradeTimeSlot::AfterClose => AFTER_CLOSE_DISPLAY,
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TradeTimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeTimeSlot {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "before-close" | "before" => Ok(TradeTimeSlot::BeforeClose),
            "after-close" | "after" => Ok(TradeTimeSlot::AfterClose),
            other => Err(LedgerError::invalid(format!(
                "unknown time slot '{other}' (expected before-close or after-close)"
            ))),
        }
    }
}

/// Slot implied by a local wall-clock time.
pub fn slot_for_time(time: NaiveTime) -> TradeTimeSlot {
    if time.hour() < CUTOFF_HOUR {
        TradeTimeSlot::BeforeClose
    } else {
        TradeTimeSlot::AfterClose
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeTiming {
    pub request_date: NaiveDate,
    pub trade_date: NaiveDate,
    pub confirm_date: NaiveDate,
    pub is_trading_day: bool,
    pub is_after_close: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellTiming {
    pub timing: TradeTiming,
    pub cash_arrival_start: NaiveDate,
    pub cash_arrival_end: NaiveDate,
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// First trading day strictly after `date`.
pub fn next_trading_day(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while !is_trading_day(next) {
        next += Duration::days(1);
    }
    next
}

/// Advance `days` trading days from `date`. Negative counts are clamped to 0.
pub fn add_trading_days(date: NaiveDate, days: i64) -> NaiveDate {
    let mut left = days.max(0);
    let mut next = date;
    while left > 0 {
        next += Duration::days(1);
        if is_trading_day(next) {
            left -= 1;
        }
    }
    next
}

fn resolve_trade_date(request_date: NaiveDate, slot: TradeTimeSlot) -> NaiveDate {
    if is_trading_day(request_date) && slot == TradeTimeSlot::BeforeClose {
        request_date
    } else {
        next_trading_day(request_date)
    }
}

fn resolve_slotted(request_date: NaiveDate, slot: TradeTimeSlot) -> TradeTiming {
    let trade_date = resolve_trade_date(request_date, slot);
    TradeTiming {
        request_date,
        trade_date,
        confirm_date: add_trading_days(trade_date, 1),
        is_trading_day: is_trading_day(request_date),
        is_after_close: slot == TradeTimeSlot::AfterClose,
    }
}

pub fn resolve_buy_timing(request_date: NaiveDate, slot: TradeTimeSlot) -> TradeTiming {
    resolve_slotted(request_date, slot)
}

pub fn resolve_sell_timing(request_date: NaiveDate, slot: TradeTimeSlot) -> SellTiming {
    let timing = resolve_slotted(request_date, slot);
    SellTiming {
        timing,
        cash_arrival_start: add_trading_days(timing.trade_date, 2),
        cash_arrival_end: add_trading_days(timing.trade_date, 4),
    }
}

/// Recurring contributions ignore the slot: same day when it trades,
/// otherwise the next trading day.
pub fn resolve_sip_timing(request_date: NaiveDate) -> TradeTiming {
    let trade_date = if is_trading_day(request_date) {
        request_date
    } else {
        next_trading_day(request_date)
    };
    TradeTiming {
        request_date,
        trade_date,
        confirm_date: add_trading_days(trade_date, 1),
        is_trading_day: is_trading_day(request_date),
        is_after_close: false,
    }
}

pub fn resolve_convert_timing(request_date: NaiveDate, slot: TradeTimeSlot) -> TradeTiming {
    resolve_slotted(request_date, slot)
}

/// Strict `YYYY-MM-DD`; impossible dates such as 2024-02-30 are rejected.
pub fn parse_ymd_date(value: &str) -> Option<NaiveDate> {
    let text = value.trim();
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

pub fn format_ymd_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Display timestamp for a trade record.
///
/// The request's own time survives when it agrees with the slot; otherwise the
/// slot's canonical time stands in.
pub fn occurred_at(requested_at: NaiveDateTime, slot: TradeTimeSlot) -> String {
    let time = if slot_for_time(requested_at.time()) == slot {
        requested_at.time()
    } else {
        slot.display_time()
    };
    requested_at
        .date()
        .and_time(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// SIP deductions are batched at the cutoff, so they always display as
/// before-close on the occurrence date.
pub fn sip_occurred_at(request_date: NaiveDate) -> String {
    request_date
        .and_time(TradeTimeSlot::BeforeClose.display_time())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
