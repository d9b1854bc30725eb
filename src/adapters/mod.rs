//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod estimate_queue;
pub mod file_config_adapter;
pub mod json_state_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_state_adapter;
