//! JSON file persistence for the ledger state.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

use crate::domain::book::LedgerState;
use crate::domain::error::LedgerError;
use crate::ports::state_port::StatePort;

pub struct JsonStateAdapter {
    path: PathBuf,
}

impl JsonStateAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename an unreadable state file to `<name>.corrupt-<timestamp>`.
    fn quarantine(&self) -> Result<PathBuf, LedgerError> {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S%3f")));
        let target = PathBuf::from(name);
        fs::rename(&self.path, &target)?;
        Ok(target)
    }
}

impl StatePort for JsonStateAdapter {
    /// An unreadable file is moved aside and treated as empty state.
    fn load(&self) -> Result<Option<LedgerState>, LedgerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<LedgerState>(&text) {
            Ok(state) => {
                debug!(
                    path = %self.path.display(),
                    positions = state.positions.len(),
                    records = state.records.len(),
                    plans = state.plans.len(),
                    "ledger state loaded"
                );
                Ok(Some(state))
            }
            Err(e) => {
                let moved = self.quarantine()?;
                warn!(
                    path = %self.path.display(),
                    moved_to = %moved.display(),
                    error = %e,
                    "unreadable ledger state moved aside"
                );
                Ok(None)
            }
        }
    }

    fn save(&self, state: &LedgerState) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(state).map_err(|e| LedgerError::Storage {
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
