//! Bulk reconciliation between the spreadsheet tier and the store.
//!
//! Pull carries intake fields from the admin tabs into the store. Push carries
//! the store's assignee back into every admin row, then lines officer mirrors
//! up with it. Both passes are idempotent, and one tab failing never stops
//! the others.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use leadsync_core::a1;
use leadsync_core::codec::is_blank_row;
use leadsync_core::{Assignment, HeaderIndex, Lead, LeadField, LeadUpdate, SyncError};
use leadsync_sheets::CellUpdate;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::mirror::{write_chunked, OfficerTab};
use crate::LeadSync;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TabReport {
    pub sheet_name: String,
    pub success: bool,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TabReport {
    fn new(sheet_name: &str) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            success: true,
            ..Self::default()
        }
    }

    fn failed(sheet_name: &str, err: &SyncError) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::default()
        }
    }
}

/// Outcome of one pass. `success` means the pass ran to the end; per-tab
/// failures are only visible in `tabs`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub batch_name: String,
    pub success: bool,
    pub tabs: Vec<TabReport>,
}

impl BatchReport {
    pub fn tab(&self, sheet_name: &str) -> Option<&TabReport> {
        self.tabs.iter().find(|t| t.sheet_name == sheet_name)
    }

    pub fn failed_tabs(&self) -> impl Iterator<Item = &TabReport> {
        self.tabs.iter().filter(|t| !t.success)
    }
}

/// Data rows of a tab as leads, first occurrence of an id winning.
fn leads_of(header: &HeaderIndex, data: &[Vec<String>], batch: &str, sheet: &str) -> (Vec<Lead>, usize) {
    let mut seen = HashSet::new();
    let mut leads = Vec::new();
    let mut repeated = 0;
    for (idx, row) in data.iter().enumerate() {
        if is_blank_row(row) {
            continue;
        }
        let lead = header.parse_row(row, batch, sheet, idx + 2);
        if seen.insert(lead.id().to_string()) {
            leads.push(lead);
        } else {
            repeated += 1;
        }
    }
    (leads, repeated)
}

impl LeadSync {
    /// Pull pass: sheet → store. Unknown leads are inserted whole; known
    /// leads only get their intake fields refreshed.
    pub async fn sync_batch_to_store(
        &self,
        batch: &str,
        sheet_names: Option<&[String]>,
    ) -> Result<BatchReport, SyncError> {
        let admin = self.admin_spreadsheet(batch).await?;
        let tabs = self.resolve_tabs(&admin, sheet_names).await?;
        let run_id = Uuid::new_v4();
        let span = info_span!("pull", %run_id, batch);
        let reports = self.pull_tabs(batch, &admin, tabs).instrument(span).await;
        Ok(BatchReport {
            run_id,
            batch_name: batch.to_string(),
            success: true,
            tabs: reports,
        })
    }

    async fn pull_tabs(&self, batch: &str, admin: &str, tabs: Vec<String>) -> Vec<TabReport> {
        let reports: Vec<TabReport> = stream::iter(tabs)
            .map(|sheet| async move {
                match self.pull_tab(batch, admin, &sheet).await {
                    Ok(report) => report,
                    Err(err) => {
                        warn!(sheet = %sheet, error = %err, "pull failed for tab");
                        TabReport::failed(&sheet, &err)
                    }
                }
            })
            .buffered(self.config.scan_concurrency.max(1))
            .collect()
            .await;
        let inserted: usize = reports.iter().map(|r| r.inserted).sum();
        let updated: usize = reports.iter().map(|r| r.updated).sum();
        info!(tabs = reports.len(), inserted, updated, "pull finished");
        reports
    }

    async fn pull_tab(&self, batch: &str, admin: &str, sheet: &str) -> Result<TabReport, SyncError> {
        let values = self.sheets.read_range(admin, &a1::tab_range(sheet)).await?;
        let (header, data) = HeaderIndex::split(&values);
        if header.is_empty() {
            return Err(SyncError::schema_mismatch(sheet, LeadField::Id.header()));
        }
        let (leads, repeated) = leads_of(&header, data, batch, sheet);
        let known = self.leads.known_lead_ids(batch, sheet).await?;
        let (updates, inserts): (Vec<Lead>, Vec<Lead>) =
            leads.into_iter().partition(|lead| known.contains(lead.id()));

        let mut report = TabReport::new(sheet);
        report.skipped = repeated;
        if repeated > 0 {
            report
                .warnings
                .push(format!("{repeated} rows repeat an earlier id and were skipped"));
        }
        for chunk in inserts.chunks(self.config.write_chunk_size.max(1)) {
            report.inserted += self.leads.insert_leads(chunk).await?;
        }
        for chunk in updates.chunks(self.config.write_chunk_size.max(1)) {
            report.updated += self.leads.update_intake(chunk).await?;
        }
        info!(sheet, inserted = report.inserted, updated = report.updated, "pulled tab");
        Ok(report)
    }

    /// Push pass: store → sheet for `assigned_to`, blank when the store has
    /// no assignee. Ids the store does not know are left alone.
    pub async fn sync_assignments_to_sheets(
        &self,
        batch: &str,
        sheet_names: Option<&[String]>,
    ) -> Result<BatchReport, SyncError> {
        let admin = self.admin_spreadsheet(batch).await?;
        let tabs = self.resolve_tabs(&admin, sheet_names).await?;
        let run_id = Uuid::new_v4();
        let span = info_span!("push", %run_id, batch);
        let reports = self.push_tabs(batch, &admin, tabs).instrument(span).await;
        Ok(BatchReport {
            run_id,
            batch_name: batch.to_string(),
            success: true,
            tabs: reports,
        })
    }

    async fn push_tabs(&self, batch: &str, admin: &str, tabs: Vec<String>) -> Vec<TabReport> {
        // Every tab lives in the admin spreadsheet, so tabs go one at a time.
        let mut reports = Vec::with_capacity(tabs.len());
        for sheet in tabs {
            let report = match self.push_tab(batch, admin, &sheet).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(sheet = %sheet, error = %err, "push failed for tab");
                    TabReport::failed(&sheet, &err)
                }
            };
            reports.push(report);
        }
        if reports.iter().any(|r| r.updated > 0) {
            self.duplicates.invalidate(batch).await;
        }
        let updated: usize = reports.iter().map(|r| r.updated).sum();
        info!(tabs = reports.len(), updated, "push finished");
        reports
    }

    async fn push_tab(&self, batch: &str, admin: &str, sheet: &str) -> Result<TabReport, SyncError> {
        let values = self.sheets.read_range(admin, &a1::tab_range(sheet)).await?;
        let (header, data) = HeaderIndex::split(&values);
        header.require(LeadField::Id, sheet)?;
        let assigned_col = header.require(LeadField::AssignedTo, sheet)?;

        let (mut leads, repeated) = leads_of(&header, data, batch, sheet);
        let ids: Vec<String> = leads.iter().map(|l| l.id().to_string()).collect();
        let stored = self.leads.assignments(batch, sheet, &ids).await?;

        let mut report = TabReport::new(sheet);
        report.skipped = repeated;
        let mut writes = Vec::new();
        for lead in &mut leads {
            let Some(desired) = stored.get(lead.id()) else {
                report.skipped += 1;
                continue;
            };
            let desired = desired.clone().unwrap_or_default();
            if lead.ops.assigned_to != desired {
                writes.push(CellUpdate::single(
                    a1::cell_range(sheet, assigned_col, lead.row_number),
                    desired.clone(),
                ));
                lead.ops.assigned_to = desired;
            }
        }
        write_chunked(self.sheets.as_ref(), admin, &writes, self.config.write_chunk_size).await?;
        report.updated = writes.len();
        info!(sheet, updated = report.updated, skipped = report.skipped, "pushed tab");

        if self.config.reconcile_mirrors {
            // Leads the store has not seen keep the assignee their admin row shows.
            let owners: Vec<&Lead> = leads.iter().collect();
            report.warnings = self.reconcile_mirrors(batch, sheet, &header, &owners).await;
        }
        Ok(report)
    }

    /// Gives every officer exactly one mirror row per lead assigned to them in
    /// `sheet` and blanks rows of leads they no longer own.
    async fn reconcile_mirrors(
        &self,
        batch: &str,
        sheet: &str,
        admin_header: &HeaderIndex,
        leads: &[&Lead],
    ) -> Vec<String> {
        let officers = match self.registry.officer_spreadsheets(batch).await {
            Ok(officers) => officers,
            Err(err) => return vec![format!("officer registry: {err}")],
        };

        let mut owned: HashMap<String, Vec<&Lead>> = HashMap::new();
        for lead in leads {
            if let Assignment::AssignedTo(officer) = lead.assignment() {
                owned.entry(officer.to_lowercase()).or_default().push(lead);
            }
        }
        let known_officers: HashSet<String> =
            officers.iter().map(|o| o.officer_name.to_lowercase()).collect();
        let mut warnings: Vec<String> = owned
            .keys()
            .filter(|name| !known_officers.contains(*name))
            .map(|name| format!("officer {name:?} has no spreadsheet in batch {batch:?}"))
            .collect();
        warnings.sort();

        let results: Vec<Option<String>> = stream::iter(officers)
            .map(|officer| {
                let mine = owned
                    .get(&officer.officer_name.to_lowercase())
                    .cloned()
                    .unwrap_or_default();
                async move {
                    self.reconcile_officer(&officer.spreadsheet_id, sheet, admin_header, &mine)
                        .await
                        .err()
                        .map(|err| {
                            warn!(officer = %officer.officer_name, error = %err, "mirror reconciliation failed");
                            format!("mirror for {}: {err}", officer.officer_name)
                        })
                }
            })
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .collect()
            .await;
        warnings.extend(results.into_iter().flatten());
        warnings
    }

    async fn reconcile_officer(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        admin_header: &HeaderIndex,
        mine: &[&Lead],
    ) -> Result<(), SyncError> {
        let phone = &self.config.phone;
        let opened = OfficerTab::open(
            self.sheets.as_ref(),
            &self.tabs,
            spreadsheet_id,
            sheet,
            admin_header.headers(),
            !mine.is_empty(),
        )
        .await?;
        let Some(mut tab) = opened else {
            return Ok(());
        };

        let mut writes = Vec::new();
        // One copy per owned lead is kept; extra copies and rows of leads
        // owned elsewhere are stale.
        let kept: HashSet<usize> = mine.iter().filter_map(|lead| tab.find(lead, phone)).collect();
        let stale: Vec<usize> = (0..tab.rows().len())
            .filter(|&idx| !is_blank_row(&tab.rows()[idx]) && !kept.contains(&idx))
            .collect();
        for idx in stale {
            writes.extend(tab.blank_row(idx));
        }
        for lead in mine {
            let update = LeadUpdate::new().with(LeadField::AssignedTo, lead.ops.assigned_to.clone());
            writes.extend(tab.upsert(lead, &update, phone));
        }
        if !writes.is_empty() {
            info!(spreadsheet_id, sheet, rows = writes.len(), "reconciled officer mirrors");
        }
        write_chunked(self.sheets.as_ref(), spreadsheet_id, &writes, self.config.write_chunk_size).await
    }
}
