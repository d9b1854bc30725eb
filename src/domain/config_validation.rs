//! Configuration validation.
//!
//! Checks every ledger setting up front and turns the INI view into typed
//! [`LedgerSettings`].

use std::path::PathBuf;

use crate::domain::calendar::TradeTimeSlot;
use crate::domain::error::LedgerError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_TICK_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    pub backend: StateBackend,
    pub state_path: PathBuf,
    pub default_slot: TradeTimeSlot,
    pub snapshot_csv: Option<PathBuf>,
    pub tick_minutes: u64,
    pub log_filter: Option<String>,
}

pub fn validate_ledger_config(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    validate_backend(config)?;
    validate_state_path(config)?;
    validate_default_slot(config)?;
    validate_snapshot_csv(config)?;
    validate_tick_minutes(config)?;
    Ok(())
}

impl LedgerSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, LedgerError> {
        validate_ledger_config(config)?;
        let tick = config.get_int("scheduler", "tick_minutes", DEFAULT_TICK_MINUTES);
        Ok(LedgerSettings {
            backend: validate_backend(config)?,
            state_path: validate_state_path(config)?,
            default_slot: validate_default_slot(config)?,
            snapshot_csv: config.get_text("market", "snapshot_csv").map(PathBuf::from),
            tick_minutes: u64::try_from(tick).unwrap_or(DEFAULT_TICK_MINUTES as u64),
            log_filter: config.get_text("logging", "filter"),
        })
    }
}

fn validate_backend(config: &dyn ConfigPort) -> Result<StateBackend, LedgerError> {
    match config.get_text("ledger", "backend").as_deref() {
        None | Some("json") => Ok(StateBackend::Json),
        Some("sqlite") => Ok(StateBackend::Sqlite),
        Some(other) => Err(LedgerError::ConfigInvalid {
            section: "ledger".to_string(),
            key: "backend".to_string(),
            reason: format!("unknown backend '{}', expected json or sqlite", other),
        }),
    }
}

fn validate_state_path(config: &dyn ConfigPort) -> Result<PathBuf, LedgerError> {
    match config.get_string("ledger", "state_path") {
        None => Err(LedgerError::ConfigMissing {
            section: "ledger".to_string(),
            key: "state_path".to_string(),
        }),
        Some(s) if s.trim().is_empty() => Err(LedgerError::ConfigInvalid {
            section: "ledger".to_string(),
            key: "state_path".to_string(),
            reason: "state_path must not be empty".to_string(),
        }),
        Some(s) => Ok(PathBuf::from(s.trim())),
    }
}

fn validate_default_slot(config: &dyn ConfigPort) -> Result<TradeTimeSlot, LedgerError> {
    match config.get_text("ledger", "default_slot") {
        None => Ok(TradeTimeSlot::default()),
        Some(s) => s.parse().map_err(|_| LedgerError::ConfigInvalid {
            section: "ledger".to_string(),
            key: "default_slot".to_string(),
            reason: format!("'{}' is not before-close or after-close", s),
        }),
    }
}

fn validate_snapshot_csv(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    match config.get_string("market", "snapshot_csv") {
        Some(s) if s.trim().is_empty() => Err(LedgerError::ConfigInvalid {
            section: "market".to_string(),
            key: "snapshot_csv".to_string(),
            reason: "snapshot_csv must not be empty when set".to_string(),
        }),
        _ => Ok(()),
    }
}

fn validate_tick_minutes(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    let value = config.get_int("scheduler", "tick_minutes", DEFAULT_TICK_MINUTES);
    if value < 1 {
        return Err(LedgerError::ConfigInvalid {
            section: "scheduler".to_string(),
            key: "tick_minutes".to_string(),
            reason: "tick_minutes must be at least 1".to_string(),
        });
    }
    Ok(())
}
