//! CSV valuation snapshots and trade-record export.
//!
//! Snapshot columns: `code,name,nav_estimate,nav_last,day_change_percent,as_of`.
//! Blank numeric cells read as zero, so a fund without an intraday estimate
//! still resolves through [`FundEstimate::effective_nav`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use csv::StringRecord;
use tracing::debug;

use crate::domain::error::LedgerError;
use crate::domain::trade_record::TradeRecord;
use crate::ports::market_port::{FundEstimate, MarketDataPort, NameLookupPort};

pub struct CsvMarketAdapter {
    estimates: HashMap<String, FundEstimate>,
}

fn snapshot_error(reason: String) -> LedgerError {
    LedgerError::MarketData {
        code: "*".into(),
        reason,
    }
}

fn numeric_column(record: &StringRecord, index: usize, name: &str) -> Result<f64, LedgerError> {
    let cell = record.get(index).unwrap_or("").trim();
    if cell.is_empty() {
        return Ok(0.0);
    }
    cell.parse()
        .map_err(|e| snapshot_error(format!("invalid {} value '{}': {}", name, cell, e)))
}

impl CsvMarketAdapter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            snapshot_error(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_csv(&content)
    }

    pub fn from_csv(content: &str) -> Result<Self, LedgerError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());
        let mut estimates = HashMap::new();

        for result in rdr.records() {
            let record = result.map_err(|e| snapshot_error(format!("CSV parse error: {}", e)))?;

            let code = record
                .get(0)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| snapshot_error("missing code column".into()))?
                .to_string();

            let estimate = FundEstimate {
                code: code.clone(),
                name: record.get(1).unwrap_or("").to_string(),
                nav_estimate: numeric_column(&record, 2, "nav_estimate")?,
                nav_last: numeric_column(&record, 3, "nav_last")?,
                day_change_percent: numeric_column(&record, 4, "day_change_percent")?,
                as_of: record.get(5).unwrap_or("").to_string(),
            };
            estimates.insert(code, estimate);
        }

        debug!(funds = estimates.len(), "valuation snapshot loaded");
        Ok(Self { estimates })
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    pub fn estimates(&self) -> impl Iterator<Item = &FundEstimate> {
        self.estimates.values()
    }
}

impl MarketDataPort for CsvMarketAdapter {
    fn fetch_estimate(&self, code: &str) -> Result<FundEstimate, LedgerError> {
        self.estimates
            .get(code.trim())
            .cloned()
            .ok_or_else(|| LedgerError::MarketData {
                code: code.to_string(),
                reason: "not in valuation snapshot".into(),
            })
    }
}

impl NameLookupPort for CsvMarketAdapter {
    fn resolve_fund_name(&self, code: &str) -> Option<String> {
        self.estimates
            .get(code.trim())
            .map(|e| e.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }
}

/// Write `records` as CSV with a header row; returns the number of rows.
pub fn export_trade_records<P: AsRef<Path>>(
    records: &[&TradeRecord],
    path: P,
) -> Result<usize, LedgerError> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).map_err(|e| LedgerError::Storage {
        reason: format!("failed to create {}: {}", path.display(), e),
    })?;
    let write_err = |e: csv::Error| LedgerError::Storage {
        reason: format!("failed to write {}: {}", path.display(), e),
    };

    writer
        .write_record([
            "id",
            "code",
            "fund_name",
            "type",
            "direction",
            "amount",
            "unit",
            "request_date",
            "trade_date",
            "confirm_date",
            "occurred_at",
        ])
        .map_err(write_err)?;

    for r in records {
        writer
            .write_record([
                r.id.to_string(),
                r.code.clone(),
                r.fund_name.clone(),
                r.trade_type.to_string(),
                r.direction.to_string(),
                r.amount.to_string(),
                r.unit.to_string(),
                r.request_date.format("%Y-%m-%d").to_string(),
                r.trade_date.format("%Y-%m-%d").to_string(),
                r.confirm_date.format("%Y-%m-%d").to_string(),
                r.occurred_at.clone(),
            ])
            .map_err(write_err)?;
    }
    writer.flush()?;
    Ok(records.len())
}
