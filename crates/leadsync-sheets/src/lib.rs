//! Spreadsheet backend contract plus the Google Sheets and in-memory implementations.

pub mod google;
pub mod memory;

use async_trait::async_trait;
use leadsync_core::SyncError;
use leadsync_storage::http::RetryDisposition;
use leadsync_storage::HttpError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use google::{GoogleSheetsClient, GOOGLE_SHEETS_API_BASE};
pub use memory::MemorySheets;

pub const CRATE_NAME: &str = "leadsync-sheets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub title: String,
    pub sheet_id: i64,
}

/// One rectangular write inside a batched values update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

impl CellUpdate {
    pub fn single(range: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            range: range.into(),
            values: vec![vec![value.into()]],
        }
    }

    pub fn row(range: impl Into<String>, row: Vec<String>) -> Self {
        Self {
            range: range.into(),
            values: vec![row],
        }
    }
}

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("spreadsheet {0} not found")]
    SpreadsheetNotFound(String),
    #[error("tab {tab:?} not found in spreadsheet {spreadsheet_id}")]
    TabNotFound { spreadsheet_id: String, tab: String },
    #[error("tab {tab:?} already exists in spreadsheet {spreadsheet_id}")]
    TabExists { spreadsheet_id: String, tab: String },
    #[error("invalid range {0:?}")]
    InvalidRange(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("spreadsheet backend unavailable: {0}")]
    Unavailable(String),
}

impl From<SheetsError> for SyncError {
    fn from(err: SheetsError) -> Self {
        let message = err.to_string();
        match err {
            SheetsError::Http(http) => match http.status() {
                Some(404) => SyncError::NotFound(message),
                _ if http.disposition() == RetryDisposition::Retryable => {
                    SyncError::RemoteTransient(message)
                }
                _ if matches!(http, HttpError::Url(_)) => SyncError::InvalidInput(message),
                _ => SyncError::Rejected(message),
            },
            SheetsError::SpreadsheetNotFound(_) | SheetsError::TabNotFound { .. } => {
                SyncError::NotFound(message)
            }
            SheetsError::TabExists { .. } | SheetsError::UnexpectedResponse(_) => {
                SyncError::Rejected(message)
            }
            SheetsError::InvalidRange(_) => SyncError::InvalidInput(message),
            SheetsError::Unavailable(_) => SyncError::RemoteTransient(message),
        }
    }
}

/// The spreadsheet operations the engine needs. Ranges use A1 notation
/// (`'Tab'!A1:C9`); see [`leadsync_core::a1`].
#[async_trait]
pub trait SpreadsheetBackend: Send + Sync {
    /// Rows of the range. Trailing empty cells and rows are omitted, so rows
    /// may be ragged.
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SheetsError>;

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError>;

    async fn batch_write_cells(
        &self,
        spreadsheet_id: &str,
        updates: &[CellUpdate],
    ) -> Result<(), SheetsError>;

    /// Every tab in display order, the implicit default tab included.
    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>, SheetsError>;

    async fn create_tab(&self, spreadsheet_id: &str, title: &str) -> Result<TabInfo, SheetsError>;

    async fn delete_tab(&self, spreadsheet_id: &str, title: &str) -> Result<(), SheetsError>;
}
