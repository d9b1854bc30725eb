//! Market-data and fund-name lookup ports.

use std::sync::Arc;

use crate::domain::error::LedgerError;

/// Latest valuation snapshot for one fund.
#[derive(Debug, Clone, PartialEq)]
pub struct FundEstimate {
    pub code: String,
    pub name: String,
    pub nav_estimate: f64,
    pub nav_last: f64,
    /// Intraday change in percent.
    pub day_change_percent: f64,
    pub as_of: String,
}

impl FundEstimate {
    /// Estimated NAV when available, else the last published NAV.
    pub fn effective_nav(&self) -> Option<f64> {
        if self.nav_estimate > 0.0 {
            Some(self.nav_estimate)
        } else if self.nav_last > 0.0 {
            Some(self.nav_last)
        } else {
            None
        }
    }
}

pub trait MarketDataPort {
    fn fetch_estimate(&self, code: &str) -> Result<FundEstimate, LedgerError>;
}

pub trait NameLookupPort {
    fn resolve_fund_name(&self, code: &str) -> Option<String>;
}

impl<T: NameLookupPort + ?Sized> NameLookupPort for Arc<T> {
    fn resolve_fund_name(&self, code: &str) -> Option<String> {
        (**self).resolve_fund_name(code)
    }
}

/// Lookup that knows no names; callers fall back to a placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNames;

impl NameLookupPort for NoNames {
    fn resolve_fund_name(&self, _code: &str) -> Option<String> {
        None
    }
}
