//! Tab metadata cache and tab propagation across a batch's spreadsheets.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadsync_core::a1;
use leadsync_core::{canonical_header, SyncError};
use leadsync_sheets::{SheetsError, SpreadsheetBackend};
use leadsync_storage::TabCacheStore;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{require_name, LeadSync};

/// Store-backed cache of tab titles per spreadsheet.
///
/// Cache trouble never reaches callers: a failed read falls through to a live
/// metadata fetch, and a failed write-back is logged and dropped.
pub struct TabCatalog {
    sheets: Arc<dyn SpreadsheetBackend>,
    cache: Arc<dyn TabCacheStore>,
    ttl: Duration,
    default_tab: String,
}

impl TabCatalog {
    pub fn new(
        sheets: Arc<dyn SpreadsheetBackend>,
        cache: Arc<dyn TabCacheStore>,
        ttl: Duration,
        default_tab: impl Into<String>,
    ) -> Self {
        Self {
            sheets,
            cache,
            ttl,
            default_tab: default_tab.into(),
        }
    }

    pub async fn list_tabs(&self, spreadsheet_id: &str, force: bool) -> Result<Vec<String>, SyncError> {
        if !force {
            if let Some(tabs) = self.cached(spreadsheet_id).await {
                return Ok(tabs);
            }
        }
        self.refresh(spreadsheet_id).await
    }

    /// Live metadata fetch that overwrites the cache entry.
    pub async fn refresh(&self, spreadsheet_id: &str) -> Result<Vec<String>, SyncError> {
        let tabs: Vec<String> = self
            .sheets
            .list_tabs(spreadsheet_id)
            .await?
            .into_iter()
            .map(|t| t.title)
            .filter(|title| !title.eq_ignore_ascii_case(&self.default_tab))
            .collect();

        if let Err(err) = self.cache.store_tabs(spreadsheet_id, &tabs).await {
            warn!(spreadsheet_id, error = %err, "tab cache write failed");
        }
        debug!(spreadsheet_id, tabs = tabs.len(), "fetched tab metadata");
        Ok(tabs)
    }

    async fn cached(&self, spreadsheet_id: &str) -> Option<Vec<String>> {
        match self.cache.cached_tabs(spreadsheet_id).await {
            Ok(Some(entry)) => {
                let age = Utc::now()
                    .signed_duration_since(entry.refreshed_at)
                    .to_std()
                    .unwrap_or_default();
                if entry.tabs.is_empty() || age > self.ttl {
                    None
                } else {
                    Some(entry.tabs)
                }
            }
            Ok(None) => None,
            Err(err) => {
                warn!(spreadsheet_id, error = %err, "tab cache read failed, using live metadata");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpreadsheetOutcome {
    pub spreadsheet_id: String,
    /// `None` for the admin spreadsheet.
    pub officer: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabChangeReport {
    pub run_id: Uuid,
    pub batch_name: String,
    pub sheet_name: String,
    pub success: bool,
    pub spreadsheets: Vec<SpreadsheetOutcome>,
}

impl TabChangeReport {
    pub fn failures(&self) -> impl Iterator<Item = &SpreadsheetOutcome> {
        self.spreadsheets.iter().filter(|s| !s.success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TabChange {
    Add,
    Remove,
}

impl LeadSync {
    /// Creates `sheet` in the admin spreadsheet and every officer spreadsheet
    /// of the batch, seeding its header row.
    pub async fn add_batch_tab(&self, batch: &str, sheet: &str) -> Result<TabChangeReport, SyncError> {
        self.change_batch_tab(batch, sheet, TabChange::Add).await
    }

    /// Deletes `sheet` everywhere in the batch.
    pub async fn remove_batch_tab(
        &self,
        batch: &str,
        sheet: &str,
    ) -> Result<TabChangeReport, SyncError> {
        self.change_batch_tab(batch, sheet, TabChange::Remove).await
    }

    async fn change_batch_tab(
        &self,
        batch: &str,
        sheet: &str,
        change: TabChange,
    ) -> Result<TabChangeReport, SyncError> {
        require_name("sheet", sheet)?;
        let sheet = sheet.trim();
        if sheet.eq_ignore_ascii_case(&self.config.default_tab) {
            return Err(SyncError::InvalidInput(format!(
                "{sheet:?} is the default tab and cannot be managed"
            )));
        }
        let admin = self.admin_spreadsheet(batch).await?;
        let officers = self.registry.officer_spreadsheets(batch).await?;
        let run_id = Uuid::new_v4();
        let span = info_span!("tab_change", %run_id, batch, sheet, ?change);

        async {
            let header = match change {
                TabChange::Add => self.template_header(&admin).await,
                TabChange::Remove => Vec::new(),
            };

            let mut targets = vec![(admin.clone(), None)];
            targets.extend(
                officers
                    .into_iter()
                    .map(|o| (o.spreadsheet_id, Some(o.officer_name))),
            );

            let mut outcomes = Vec::with_capacity(targets.len());
            for (spreadsheet_id, officer) in targets {
                let result = match change {
                    TabChange::Add => self.create_with_header(&spreadsheet_id, sheet, &header).await,
                    TabChange::Remove => self.delete_if_present(&spreadsheet_id, sheet).await,
                };
                if let Err(err) = self.tabs.refresh(&spreadsheet_id).await {
                    warn!(%spreadsheet_id, error = %err, "tab metadata refresh failed");
                }
                let outcome = match result {
                    Ok(note) => SpreadsheetOutcome {
                        spreadsheet_id,
                        officer,
                        success: true,
                        error: None,
                        note,
                    },
                    Err(err) => {
                        warn!(%spreadsheet_id, error = %err, "tab change failed");
                        SpreadsheetOutcome {
                            spreadsheet_id,
                            officer,
                            success: false,
                            error: Some(err.to_string()),
                            note: None,
                        }
                    }
                };
                outcomes.push(outcome);
            }

            self.duplicates.invalidate(batch).await;
            let failed = outcomes.iter().filter(|o| !o.success).count();
            info!(spreadsheets = outcomes.len(), failed, "tab change finished");
            Ok(TabChangeReport {
                run_id,
                batch_name: batch.to_string(),
                sheet_name: sheet.to_string(),
                success: true,
                spreadsheets: outcomes,
            })
        }
        .instrument(span)
        .await
    }

    /// Header row of the admin spreadsheet's first lead tab, or the canonical list.
    async fn template_header(&self, admin: &str) -> Vec<String> {
        let first = match self.tabs.list_tabs(admin, false).await {
            Ok(tabs) => tabs.into_iter().next(),
            Err(err) => {
                warn!(error = %err, "could not list admin tabs for header template");
                None
            }
        };
        if let Some(tab) = first {
            let range = format!("{}!1:1", a1::quote_tab(&tab));
            match self.sheets.read_range(admin, &range).await {
                Ok(rows) => {
                    if let Some(header) = rows.into_iter().next().filter(|h| !h.is_empty()) {
                        return header;
                    }
                }
                Err(err) => warn!(%tab, error = %err, "could not read header template"),
            }
        }
        canonical_header()
    }

    async fn create_with_header(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        header: &[String],
    ) -> Result<Option<String>, SyncError> {
        let note = match self.sheets.create_tab(spreadsheet_id, sheet).await {
            Ok(_) => None,
            Err(SheetsError::TabExists { .. }) => Some("tab already existed".to_string()),
            Err(err) => return Err(err.into()),
        };
        if note.is_none() {
            self.sheets
                .write_range(
                    spreadsheet_id,
                    &a1::row_range(sheet, 1, header.len()),
                    &[header.to_vec()],
                )
                .await?;
        }
        Ok(note)
    }

    async fn delete_if_present(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
    ) -> Result<Option<String>, SyncError> {
        match self.sheets.delete_tab(spreadsheet_id, sheet).await {
            Ok(()) => Ok(None),
            Err(SheetsError::TabNotFound { .. }) => Ok(Some("tab was already absent".to_string())),
            Err(err) => Err(err.into()),
        }
    }
}
