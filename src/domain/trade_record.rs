//! Append-only log of executed trades.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
    Sip,
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// Whether a record's `amount` is currency or fund shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeUnit {
    Currency,
    Share,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "buy",
            TradeType::Sell => "sell",
            TradeType::Sip => "sip",
            TradeType::Convert => "convert",
        }
    }
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

impl TradeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeUnit::Currency => "currency",
            TradeUnit::Share => "share",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TradeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeType::Buy),
            "sell" => Ok(TradeType::Sell),
            "sip" => Ok(TradeType::Sip),
            "convert" => Ok(TradeType::Convert),
            other => Err(LedgerError::invalid(format!("unknown trade type '{other}'"))),
        }
    }
}

impl FromStr for TradeDirection {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeDirection::Buy),
            "sell" => Ok(TradeDirection::Sell),
            other => Err(LedgerError::invalid(format!("unknown direction '{other}'"))),
        }
    }
}

impl FromStr for TradeUnit {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "currency" => Ok(TradeUnit::Currency),
            "share" => Ok(TradeUnit::Share),
            other => Err(LedgerError::invalid(format!("unknown unit '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub code: String,
    pub fund_name: String,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub direction: TradeDirection,
    pub amount: f64,
    pub unit: TradeUnit,
    pub request_date: NaiveDate,
    pub trade_date: NaiveDate,
    pub confirm_date: NaiveDate,
    pub occurred_at: String,
}

/// A record before the log assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTradeRecord {
    pub code: String,
    pub fund_name: String,
    pub trade_type: TradeType,
    pub direction: TradeDirection,
    pub amount: f64,
    pub unit: TradeUnit,
    pub request_date: NaiveDate,
    pub trade_date: NaiveDate,
    pub confirm_date: NaiveDate,
    pub occurred_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeRecordLog {
    seed: u64,
    records: Vec<TradeRecord>,
}

impl TradeRecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from stored records; `seed` is the last id handed out.
    pub fn from_parts(seed: u64, records: Vec<TradeRecord>) -> Self {
        TradeRecordLog { seed, records }
    }

    /// Append a record; ids increase monotonically and are never reused.
    pub fn append(&mut self, record: NewTradeRecord) -> &TradeRecord {
        self.seed = self.seed.max(self.max_id()) + 1;
        self.records.push(TradeRecord {
            id: self.seed,
            code: record.code,
            fund_name: record.fund_name,
            trade_type: record.trade_type,
            direction: record.direction,
            amount: record.amount,
            unit: record.unit,
            request_date: record.request_date,
            trade_date: record.trade_date,
            confirm_date: record.confirm_date,
            occurred_at: record.occurred_at,
        });
        &self.records[self.records.len() - 1]
    }

    fn max_id(&self) -> u64 {
        self.records.last().map_or(0, |r| r.id)
    }

    /// Records for `code`, newest first by display timestamp, then by id.
    pub fn by_code(&self, code: &str) -> Vec<&TradeRecord> {
        let mut found: Vec<&TradeRecord> =
            self.records.iter().filter(|r| r.code == code).collect();
        found.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        found
    }

    /// Every record in append order.
    pub fn all(&self) -> &[TradeRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&TradeRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_id(&self) -> u64 {
        self.seed
    }
}
