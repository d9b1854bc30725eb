//! Domain error types.

/// Top-level error type for fundledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("insufficient position for {code}")]
    InsufficientPosition { code: String },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("storage query error: {reason}")]
    StorageQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("market data unavailable for {code}: {reason}")]
    MarketData { code: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        LedgerError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// True for the two rejection kinds a trade operation can produce.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidInput { .. } | LedgerError::InsufficientPosition { .. }
        )
    }
}

impl From<&LedgerError> for std::process::ExitCode {
    fn from(err: &LedgerError) -> Self {
        let code: u8 = match err {
            LedgerError::Io(_) => 1,
            LedgerError::ConfigParse { .. }
            | LedgerError::ConfigMissing { .. }
            | LedgerError::ConfigInvalid { .. } => 2,
            LedgerError::Storage { .. } | LedgerError::StorageQuery { .. } => 3,
            LedgerError::InvalidInput { .. } | LedgerError::InsufficientPosition { .. } => 4,
            LedgerError::MarketData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
