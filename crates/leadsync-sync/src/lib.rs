//! Replication engine: tab metadata cache, duplicate-phone index, assignment
//! state machine and the pull/push reconciliation passes.

pub mod assignment;
pub mod config;
pub mod duplicates;
pub mod mirror;
pub mod reconcile;
pub mod tabs;

use std::sync::Arc;

use leadsync_core::{PhoneFormat, SyncError};
use leadsync_sheets::SpreadsheetBackend;
use leadsync_storage::{LeadStore, Registry, TabCacheStore};
use tracing::debug;

pub use assignment::LeadUpdateOutcome;
pub use config::EngineConfig;
pub use duplicates::{DuplicateIndex, PhoneOwner};
pub use reconcile::{BatchReport, TabReport};
pub use tabs::{SpreadsheetOutcome, TabCatalog, TabChangeReport};

pub const CRATE_NAME: &str = "leadsync-sync";

/// Entry point consumed by the HTTP and CLI surfaces.
pub struct LeadSync {
    config: EngineConfig,
    sheets: Arc<dyn SpreadsheetBackend>,
    registry: Arc<dyn Registry>,
    leads: Arc<dyn LeadStore>,
    tabs: Arc<TabCatalog>,
    duplicates: DuplicateIndex,
}

impl LeadSync {
    pub fn new(
        config: EngineConfig,
        sheets: Arc<dyn SpreadsheetBackend>,
        registry: Arc<dyn Registry>,
        tab_cache: Arc<dyn TabCacheStore>,
        leads: Arc<dyn LeadStore>,
    ) -> Self {
        let tabs = Arc::new(TabCatalog::new(
            sheets.clone(),
            tab_cache,
            config.tab_cache_ttl(),
            config.default_tab.clone(),
        ));
        let duplicates = DuplicateIndex::new(
            sheets.clone(),
            registry.clone(),
            tabs.clone(),
            config.phone.clone(),
            config.duplicate_ttl(),
            config.scan_concurrency,
        );
        Self {
            config,
            sheets,
            registry,
            leads,
            tabs,
            duplicates,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phone_format(&self) -> &PhoneFormat {
        &self.config.phone
    }

    pub fn duplicates(&self) -> &DuplicateIndex {
        &self.duplicates
    }

    pub fn tab_catalog(&self) -> &TabCatalog {
        &self.tabs
    }

    async fn admin_spreadsheet(&self, batch: &str) -> Result<String, SyncError> {
        require_name("batch", batch)?;
        self.registry
            .admin_spreadsheet_id(batch)
            .await?
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                SyncError::NotConfigured(format!("batch {batch:?} has no admin spreadsheet"))
            })
    }

    /// Tabs of the batch's admin spreadsheet, minus the default tab.
    pub async fn list_sheets_for_batch(
        &self,
        batch: &str,
        force: bool,
    ) -> Result<Vec<String>, SyncError> {
        let admin = self.admin_spreadsheet(batch).await?;
        self.tabs.list_tabs(&admin, force).await
    }

    /// First non-blank assignee recorded for the phone anywhere in the batch,
    /// or an empty string. Fails instead of answering empty when some tab of
    /// the batch could not be read.
    pub async fn get_assignee_for_duplicate_phone(
        &self,
        batch: &str,
        phone: &str,
    ) -> Result<String, SyncError> {
        let canonical = self.config.phone.canonicalize(phone);
        if canonical.is_empty() {
            debug!(batch, "blank phone, skipping duplicate lookup");
            return Ok(String::new());
        }
        require_name("batch", batch)?;
        self.duplicates
            .with_index(batch, |index| match index.first_assignee(&canonical) {
                Some(assignee) => Ok(assignee.to_string()),
                None => index.incomplete_error().map_or(Ok(String::new()), Err),
            })
            .await?
    }

    /// Tab names to process: the caller's selection, or every tab of the batch.
    async fn resolve_tabs(
        &self,
        admin: &str,
        sheet_names: Option<&[String]>,
    ) -> Result<Vec<String>, SyncError> {
        match sheet_names {
            Some(names) if !names.is_empty() => Ok(names
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect()),
            _ => self.tabs.list_tabs(admin, false).await,
        }
    }
}

pub(crate) fn require_name(what: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}
