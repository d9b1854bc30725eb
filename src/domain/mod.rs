//! Core domain types and logic.

pub mod book;
pub mod calendar;
pub mod config_validation;
pub mod error;
pub mod instruction;
pub mod ledger;
pub mod operations;
pub mod position;
pub mod sip;
pub mod trade_record;
