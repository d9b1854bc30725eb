//! Collaborator interfaces the ledger depends on.

pub mod config_port;
pub mod market_port;
pub mod state_port;
