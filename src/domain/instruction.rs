//! Trade instructions accepted by the ledger, one variant per trade kind.

use chrono::NaiveDateTime;

use super::calendar::{SellTiming, TradeTimeSlot, TradeTiming};

#[derive(Debug, Clone, PartialEq)]
pub struct BuyInstruction {
    pub code: String,
    pub fund_name: Option<String>,
    pub amount: f64,
    pub day_rate: Option<f64>,
    pub slot: TradeTimeSlot,
    pub requested_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellInstruction {
    pub code: String,
    pub fund_name: Option<String>,
    pub share: f64,
    pub nav: f64,
    pub day_rate: Option<f64>,
    pub slot: TradeTimeSlot,
    pub requested_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SipInstruction {
    pub code: String,
    pub fund_name: Option<String>,
    pub amount: f64,
    pub day_rate: Option<f64>,
    pub requested_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertInstruction {
    pub source_code: String,
    pub source_name: Option<String>,
    pub target_code: String,
    pub out_amount: f64,
    pub in_amount: f64,
    pub source_day_rate: Option<f64>,
    pub target_day_rate: Option<f64>,
    pub slot: TradeTimeSlot,
    pub requested_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeInstruction {
    Buy(BuyInstruction),
    Sell(SellInstruction),
    Sip(SipInstruction),
    Convert(ConvertInstruction),
}

impl TradeInstruction {
    /// Instrument whose position the instruction reduces or grows first.
    pub fn code(&self) -> &str {
        match self {
            TradeInstruction::Buy(i) => &i.code,
            TradeInstruction::Sell(i) => &i.code,
            TradeInstruction::Sip(i) => &i.code,
            TradeInstruction::Convert(i) => &i.source_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellResult {
    pub sold_share: f64,
    pub sold_amount: f64,
    pub max_sell_share: f64,
    pub remaining_amount: f64,
    pub timing: SellTiming,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertResult {
    pub actual_out_amount: f64,
    pub in_amount: f64,
    pub source_remaining: f64,
    pub target_amount: f64,
    pub timing: TradeTiming,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeOutcome {
    Bought(TradeTiming),
    Sold(SellResult),
    Invested(TradeTiming),
    Converted(ConvertResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn code_of_each_variant() {
        let buy = TradeInstruction::Buy(BuyInstruction {
            code: "001467".into(),
            fund_name: None,
            amount: 1000.0,
            day_rate: None,
            slot: TradeTimeSlot::AfterClose,
            requested_at: at(),
        });
        assert_eq!(buy.code(), "001467");

        let convert = TradeInstruction::Convert(ConvertInstruction {
            source_code: "017811".into(),
            source_name: None,
            target_code: "001467".into(),
            out_amount: 100.0,
            in_amount: 99.0,
            source_day_rate: None,
            target_day_rate: None,
            slot: TradeTimeSlot::BeforeClose,
            requested_at: at(),
        });
        assert_eq!(convert.code(), "017811");
    }
}
