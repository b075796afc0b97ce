use thiserror::Error;

/// Failure taxonomy shared by every layer of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A required spreadsheet or store binding is missing.
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Network, timeout or rate-limit failure against a remote backend.
    #[error("remote backend unavailable: {0}")]
    RemoteTransient(String),
    #[error("tab {tab:?} has no {header:?} column")]
    SchemaMismatch { tab: String, header: String },
    /// The remote backend refused the request and retrying will not help.
    #[error("remote backend rejected the request: {0}")]
    Rejected(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::NotFound(_) => "not_found",
            Self::RemoteTransient(_) => "remote_transient",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::Rejected(_) => "rejected",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteTransient(_))
    }

    pub fn schema_mismatch(tab: impl Into<String>, header: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            tab: tab.into(),
            header: header.into(),
        }
    }
}
