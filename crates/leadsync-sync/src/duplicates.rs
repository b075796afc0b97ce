//! Duplicate-phone index: canonical phone → owners, per batch, with a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use leadsync_core::{a1, is_sentinel, HeaderIndex, LeadField, PhoneFormat, SyncError};
use leadsync_sheets::SpreadsheetBackend;
use leadsync_storage::Registry;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::tabs::TabCatalog;

/// One row that carries an assignee for a phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhoneOwner {
    pub assignee: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub lead_id: String,
}

impl PhoneOwner {
    fn is_lead(&self, sheet_name: &str, lead_id: &str) -> bool {
        self.sheet_name == sheet_name && self.lead_id == lead_id
    }
}

/// Owners per canonical phone in scan order: admin spreadsheet first, then
/// officer spreadsheets by officer name, tabs in display order.
#[derive(Debug, Clone, Default)]
pub struct PhoneMap {
    owners: HashMap<String, Vec<PhoneOwner>>,
    unread: Vec<String>,
}

impl PhoneMap {
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Whether every tab of the batch made it into the map.
    pub fn is_complete(&self) -> bool {
        self.unread.is_empty()
    }

    /// Error for lookups that found no owner in an incomplete map: the phone
    /// may well be owned in a tab that could not be read.
    pub fn incomplete_error(&self) -> Option<SyncError> {
        (!self.is_complete()).then(|| {
            SyncError::RemoteTransient(format!(
                "duplicate check incomplete, unreadable: {}",
                self.unread.join(", ")
            ))
        })
    }

    fn push(&mut self, phone: String, owner: PhoneOwner) {
        self.owners.entry(phone).or_default().push(owner);
    }

    /// First-seen assignee for the phone.
    pub fn first_assignee(&self, phone: &str) -> Option<&str> {
        self.owners
            .get(phone)?
            .first()
            .map(|o| o.assignee.as_str())
    }

    /// First owner holding a real assignment for the phone that is not the
    /// given lead or one of its mirrors.
    pub fn active_owner_excluding(
        &self,
        phone: &str,
        sheet_name: &str,
        lead_id: &str,
    ) -> Option<&PhoneOwner> {
        self.owners
            .get(phone)?
            .iter()
            .find(|o| !is_sentinel(&o.assignee) && !o.is_lead(sheet_name, lead_id))
    }

    fn release(&mut self, phone: &str, sheet_name: &str, lead_id: &str) {
        if let Some(owners) = self.owners.get_mut(phone) {
            owners.retain(|o| !o.is_lead(sheet_name, lead_id));
            if owners.is_empty() {
                self.owners.remove(phone);
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    built_at: Instant,
    map: PhoneMap,
}

pub struct DuplicateIndex {
    sheets: Arc<dyn SpreadsheetBackend>,
    registry: Arc<dyn Registry>,
    tabs: Arc<TabCatalog>,
    phone: PhoneFormat,
    ttl: Duration,
    concurrency: usize,
    entries: RwLock<HashMap<String, Entry>>,
}

impl DuplicateIndex {
    pub fn new(
        sheets: Arc<dyn SpreadsheetBackend>,
        registry: Arc<dyn Registry>,
        tabs: Arc<TabCatalog>,
        phone: PhoneFormat,
        ttl: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            sheets,
            registry,
            tabs,
            phone,
            ttl,
            concurrency: concurrency.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Runs `f` against a fresh index for the batch, rebuilding it first when
    /// the cached one is missing or older than the TTL. A rebuild that could
    /// not read every tab is handed to `f` but never cached.
    pub async fn with_index<R>(
        &self,
        batch: &str,
        f: impl FnOnce(&PhoneMap) -> R,
    ) -> Result<R, SyncError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(batch) {
                if entry.built_at.elapsed() < self.ttl {
                    return Ok(f(&entry.map));
                }
            }
        }

        let map = self.build(batch).await?;
        let result = f(&map);
        if !map.is_complete() {
            return Ok(result);
        }
        self.entries.write().await.insert(
            batch.to_string(),
            Entry {
                built_at: Instant::now(),
                map,
            },
        );
        Ok(result)
    }

    pub async fn invalidate(&self, batch: &str) {
        self.entries.write().await.remove(batch);
    }

    /// Replaces whatever the index holds for the lead with `owner`. Does
    /// nothing when the batch has no cached index.
    pub async fn record(&self, batch: &str, phone: &str, owner: PhoneOwner) {
        if phone.is_empty() {
            return;
        }
        if let Some(entry) = self.entries.write().await.get_mut(batch) {
            entry.map.release(phone, &owner.sheet_name, &owner.lead_id);
            entry.map.push(phone.to_string(), owner);
        }
    }

    pub async fn release(&self, batch: &str, phone: &str, sheet_name: &str, lead_id: &str) {
        if phone.is_empty() {
            return;
        }
        if let Some(entry) = self.entries.write().await.get_mut(batch) {
            entry.map.release(phone, sheet_name, lead_id);
        }
    }

    /// Full scan of every tab of every spreadsheet in the batch. Spreadsheets
    /// and tabs that fail to read are recorded as unread.
    async fn build(&self, batch: &str) -> Result<PhoneMap, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("duplicate_index_build", %run_id, batch);
        self.scan(batch).instrument(span).await
    }

    async fn scan(&self, batch: &str) -> Result<PhoneMap, SyncError> {
        let admin = self
            .registry
            .admin_spreadsheet_id(batch)
            .await?
            .ok_or_else(|| {
                SyncError::NotConfigured(format!("batch {batch:?} has no admin spreadsheet"))
            })?;
        let mut spreadsheets = vec![admin];
        spreadsheets.extend(
            self.registry
                .officer_spreadsheets(batch)
                .await?
                .into_iter()
                .map(|o| o.spreadsheet_id),
        );

        let mut map = PhoneMap::default();
        let mut units = Vec::new();
        for spreadsheet_id in spreadsheets {
            match self.tabs.list_tabs(&spreadsheet_id, false).await {
                Ok(tabs) => units.extend(tabs.into_iter().map(|t| (spreadsheet_id.clone(), t))),
                Err(err) => {
                    warn!(%spreadsheet_id, error = %err, "skipping spreadsheet in duplicate scan");
                    map.unread.push(spreadsheet_id);
                }
            }
        }

        let scanned = units.len();
        let results: Vec<_> = stream::iter(units)
            .map(|(spreadsheet_id, tab)| async move {
                let rows = self
                    .sheets
                    .read_range(&spreadsheet_id, &a1::tab_range(&tab))
                    .await;
                (spreadsheet_id, tab, rows)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (spreadsheet_id, tab, rows) in results {
            let rows = match rows {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(%spreadsheet_id, %tab, error = %err, "skipping tab in duplicate scan");
                    map.unread.push(format!("{spreadsheet_id}/{tab}"));
                    continue;
                }
            };
            self.index_tab(&mut map, &spreadsheet_id, &tab, &rows);
        }
        info!(
            tabs = scanned,
            phones = map.len(),
            unread = map.unread.len(),
            "duplicate index built"
        );
        Ok(map)
    }

    fn index_tab(&self, map: &mut PhoneMap, spreadsheet_id: &str, tab: &str, rows: &[Vec<String>]) {
        let (header, data) = HeaderIndex::split(rows);
        if header.column_of(LeadField::Phone).is_none()
            || header.column_of(LeadField::AssignedTo).is_none()
        {
            debug!(spreadsheet_id, tab, "tab has no phone/assigned_to columns");
            return;
        }
        for (idx, row) in data.iter().enumerate() {
            let assignee = header.value(row, LeadField::AssignedTo);
            if assignee.is_empty() {
                continue;
            }
            let phone = self.phone.canonicalize(header.value(row, LeadField::Phone));
            if phone.is_empty() {
                continue;
            }
            map.push(
                phone,
                PhoneOwner {
                    assignee: assignee.to_string(),
                    spreadsheet_id: spreadsheet_id.to_string(),
                    sheet_name: tab.to_string(),
                    lead_id: header.lead_id(row, idx + 2),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(assignee: &str, sheet: &str, id: &str) -> PhoneOwner {
        PhoneOwner {
            assignee: assignee.into(),
            spreadsheet_id: "admin".into(),
            sheet_name: sheet.into(),
            lead_id: id.into(),
        }
    }

    #[test]
    fn first_seen_assignee_wins() {
        let mut map = PhoneMap::default();
        map.push("94771234567".into(), owner("Alice", "Main Leads", "7"));
        map.push("94771234567".into(), owner("Bob", "Extra Leads", "3"));
        assert_eq!(map.first_assignee("94771234567"), Some("Alice"));
        assert_eq!(map.first_assignee("94770000000"), None);
    }

    #[test]
    fn active_owner_skips_self_and_sentinels() {
        let mut map = PhoneMap::default();
        map.push("94771234567".into(), owner("Duplicate", "Main Leads", "9"));
        map.push("94771234567".into(), owner("Alice", "Main Leads", "7"));
        assert_eq!(map.active_owner_excluding("94771234567", "Main Leads", "7"), None);
        assert_eq!(
            map.active_owner_excluding("94771234567", "Main Leads", "9")
                .map(|o| o.assignee.as_str()),
            Some("Alice")
        );
    }

    #[test]
    fn unread_units_make_misses_an_error() {
        let mut map = PhoneMap::default();
        assert!(map.incomplete_error().is_none());
        map.unread.push("admin/Extra Leads".into());
        let err = map.incomplete_error().unwrap();
        assert!(err.is_transient());
        assert!(err.to_string().contains("admin/Extra Leads"));
    }

    #[test]
    fn release_drops_every_copy_of_a_lead() {
        let mut map = PhoneMap::default();
        map.push("94771234567".into(), owner("Alice", "Main Leads", "7"));
        let mut mirror = owner("Alice", "Main Leads", "7");
        mirror.spreadsheet_id = "alice".into();
        map.push("94771234567".into(), mirror);
        map.release("94771234567", "Main Leads", "7");
        assert!(map.is_empty());
    }
}
