//! In-process implementation of the store traits, used by tests and local runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use leadsync_core::{Lead, LeadKey, LeadUpdate};

use crate::{
    apply_operational, CachedTabs, LeadStore, OfficerSpreadsheet, Registry, StoreError,
    TabCacheStore,
};

#[derive(Debug, Default)]
struct State {
    batches: BTreeMap<String, String>,
    officers: BTreeMap<(String, String), String>,
    tab_cache: HashMap<String, CachedTabs>,
    leads: BTreeMap<LeadKey, Lead>,
    unavailable: bool,
    tab_cache_unavailable: bool,
    tab_cache_writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn guard(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(state)
    }

    fn cache_guard(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let state = self.guard()?;
        if state.tab_cache_unavailable {
            return Err(StoreError::Unavailable("tab cache switched off".into()));
        }
        Ok(state)
    }

    pub fn register_batch(&self, batch: &str, admin_spreadsheet_id: &str) {
        self.lock()
            .batches
            .insert(batch.to_string(), admin_spreadsheet_id.to_string());
    }

    pub fn register_officer(&self, batch: &str, officer: &str, spreadsheet_id: &str) {
        self.lock().officers.insert(
            (batch.to_string(), officer.to_string()),
            spreadsheet_id.to_string(),
        );
    }

    /// Makes every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Makes only the tab cache calls fail.
    pub fn set_tab_cache_unavailable(&self, unavailable: bool) {
        self.lock().tab_cache_unavailable = unavailable;
    }

    pub fn tab_cache_writes(&self) -> usize {
        self.lock().tab_cache_writes
    }

    pub fn lead_count(&self) -> usize {
        self.lock().leads.len()
    }

    /// Seeds or replaces a lead directly, bypassing upsert rules.
    pub fn put_lead(&self, lead: Lead) {
        self.lock().leads.insert(lead.key.clone(), lead);
    }
}

#[async_trait]
impl Registry for MemoryStore {
    async fn admin_spreadsheet_id(&self, batch: &str) -> Result<Option<String>, StoreError> {
        Ok(self.guard()?.batches.get(batch).cloned())
    }

    async fn officer_spreadsheets(
        &self,
        batch: &str,
    ) -> Result<Vec<OfficerSpreadsheet>, StoreError> {
        Ok(self
            .guard()?
            .officers
            .iter()
            .filter(|((b, _), _)| b == batch)
            .map(|((b, officer), id)| OfficerSpreadsheet {
                batch_name: b.clone(),
                officer_name: officer.clone(),
                spreadsheet_id: id.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TabCacheStore for MemoryStore {
    async fn cached_tabs(&self, spreadsheet_id: &str) -> Result<Option<CachedTabs>, StoreError> {
        Ok(self.cache_guard()?.tab_cache.get(spreadsheet_id).cloned())
    }

    async fn store_tabs(&self, spreadsheet_id: &str, tabs: &[String]) -> Result<(), StoreError> {
        let mut state = self.cache_guard()?;
        state.tab_cache.insert(
            spreadsheet_id.to_string(),
            CachedTabs {
                tabs: tabs.to_vec(),
                refreshed_at: Utc::now(),
            },
        );
        state.tab_cache_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn known_lead_ids(&self, batch: &str, sheet: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .guard()?
            .leads
            .keys()
            .filter(|k| k.batch_name == batch && k.sheet_name == sheet)
            .map(|k| k.sheet_lead_id.clone())
            .collect())
    }

    async fn insert_leads(&self, leads: &[Lead]) -> Result<usize, StoreError> {
        let mut state = self.guard()?;
        for lead in leads {
            match state.leads.get_mut(&lead.key) {
                Some(existing) => {
                    existing.intake = lead.intake.clone();
                    existing.row_number = lead.row_number;
                }
                None => {
                    state.leads.insert(lead.key.clone(), lead.clone());
                }
            }
        }
        Ok(leads.len())
    }

    async fn update_intake(&self, leads: &[Lead]) -> Result<usize, StoreError> {
        let mut state = self.guard()?;
        let mut updated = 0;
        for lead in leads {
            if let Some(existing) = state.leads.get_mut(&lead.key) {
                existing.intake = lead.intake.clone();
                existing.row_number = lead.row_number;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn assignments(
        &self,
        batch: &str,
        sheet: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<String>>, StoreError> {
        let state = self.guard()?;
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(lead) = state.leads.get(&LeadKey::new(batch, sheet, id.as_str())) {
                let assignee = lead.ops.assigned_to.trim();
                let assignee = (!assignee.is_empty()).then(|| assignee.to_string());
                out.insert(id.clone(), assignee);
            }
        }
        Ok(out)
    }

    async fn update_operational(
        &self,
        key: &LeadKey,
        update: &LeadUpdate,
    ) -> Result<bool, StoreError> {
        let mut state = self.guard()?;
        match state.leads.get_mut(key) {
            Some(lead) => {
                apply_operational(lead, update);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_lead(&self, key: &LeadKey) -> Result<Option<Lead>, StoreError> {
        Ok(self.guard()?.leads.get(key).cloned())
    }
}
