//! Persistence port for the ledger state.

use crate::domain::book::LedgerState;
use crate::domain::error::LedgerError;

/// Round-trips the full position map, trade log and plan map.
pub trait StatePort {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<LedgerState>, LedgerError>;
    fn save(&self, state: &LedgerState) -> Result<(), LedgerError>;
}
