#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use fundledger::domain::calendar::TradeTimeSlot;
use fundledger::domain::error::LedgerError;
use fundledger::domain::instruction::{
    BuyInstruction, ConvertInstruction, SellInstruction, SipInstruction,
};
use fundledger::ports::market_port::{FundEstimate, MarketDataPort, NameLookupPort};
use std::collections::HashMap;

pub struct MockMarketPort {
    pub estimates: HashMap<String, FundEstimate>,
    pub errors: HashMap<String, String>,
}

impl MockMarketPort {
    pub fn new() -> Self {
        Self {
            estimates: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_estimate(mut self, code: &str, name: &str, nav: f64, day_change: f64) -> Self {
        self.estimates.insert(
            code.to_string(),
            FundEstimate {
                code: code.to_string(),
                name: name.to_string(),
                nav_estimate: nav,
                nav_last: nav,
                day_change_percent: day_change,
                as_of: "2024-01-15 15:00".to_string(),
            },
        );
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.errors.insert(code.to_string(), reason.to_string());
        self
    }
}

impl MarketDataPort for MockMarketPort {
    fn fetch_estimate(&self, code: &str) -> Result<FundEstimate, LedgerError> {
        if let Some(reason) = self.errors.get(code) {
            return Err(LedgerError::MarketData {
                code: code.to_string(),
                reason: reason.clone(),
            });
        }
        self.estimates
            .get(code)
            .cloned()
            .ok_or_else(|| LedgerError::MarketData {
                code: code.to_string(),
                reason: "unknown code".to_string(),
            })
    }
}

impl NameLookupPort for MockMarketPort {
    fn resolve_fund_name(&self, code: &str) -> Option<String> {
        self.estimates.get(code).map(|e| e.name.clone())
    }
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn at(date: NaiveDate, h: u32, min: u32) -> NaiveDateTime {
    date.and_hms_opt(h, min, 0).unwrap()
}

pub fn buy(code: &str, amount: f64, slot: TradeTimeSlot, requested_at: NaiveDateTime) -> BuyInstruction {
    BuyInstruction {
        code: code.to_string(),
        fund_name: None,
        amount,
        day_rate: None,
        slot,
        requested_at,
    }
}

pub fn sell(
    code: &str,
    share: f64,
    nav: f64,
    slot: TradeTimeSlot,
    requested_at: NaiveDateTime,
) -> SellInstruction {
    SellInstruction {
        code: code.to_string(),
        fund_name: None,
        share,
        nav,
        day_rate: None,
        slot,
        requested_at,
    }
}

pub fn sip(code: &str, amount: f64, requested_at: NaiveDateTime) -> SipInstruction {
    SipInstruction {
        code: code.to_string(),
        fund_name: None,
        amount,
        day_rate: None,
        requested_at,
    }
}

pub fn convert(
    source: &str,
    target: &str,
    out_amount: f64,
    in_amount: f64,
    slot: TradeTimeSlot,
    requested_at: NaiveDateTime,
) -> ConvertInstruction {
    ConvertInstruction {
        source_code: source.to_string(),
        source_name: None,
        target_code: target.to_string(),
        out_amount,
        in_amount,
        source_day_rate: None,
        target_day_rate: None,
        slot,
        requested_at,
    }
}
