//! Officer-side copies of leads.
//!
//! A mirror row sits in the officer's spreadsheet under the tab of the same
//! name as the admin tab. Removal blanks the row in place so row offsets of
//! every other mirror stay put; blank rows are reused by later appends.

use leadsync_core::a1;
use leadsync_core::codec::is_blank_row;
use leadsync_core::{HeaderIndex, Lead, LeadField, LeadUpdate, PhoneFormat, SyncError};
use leadsync_sheets::{CellUpdate, SpreadsheetBackend};
use tracing::{debug, info};

use crate::tabs::TabCatalog;

/// An officer tab loaded into memory. Edits update the local copy and
/// return the cell writes that bring the remote tab in line.
#[derive(Debug, Clone)]
pub struct OfficerTab {
    pub spreadsheet_id: String,
    pub tab: String,
    header: HeaderIndex,
    rows: Vec<Vec<String>>,
}

impl OfficerTab {
    pub fn new(spreadsheet_id: &str, tab: &str, values: Vec<Vec<String>>) -> Self {
        let mut values = values.into_iter();
        let header = HeaderIndex::from_header_row(&values.next().unwrap_or_default());
        Self {
            spreadsheet_id: spreadsheet_id.to_string(),
            tab: tab.to_string(),
            header,
            rows: values.collect(),
        }
    }

    /// Loads the tab, creating it with `template` as header row when it does
    /// not exist yet and `create` is set. `None` means absent and not created.
    pub async fn open(
        sheets: &dyn SpreadsheetBackend,
        tabs: &TabCatalog,
        spreadsheet_id: &str,
        tab: &str,
        template: &[String],
        create: bool,
    ) -> Result<Option<Self>, SyncError> {
        let existing = tabs.list_tabs(spreadsheet_id, false).await?;
        let mut present = existing.iter().any(|t| t == tab);
        if !present {
            // The cache may simply be stale.
            present = tabs.refresh(spreadsheet_id).await?.iter().any(|t| t == tab);
        }
        if !present {
            if !create {
                return Ok(None);
            }
            sheets.create_tab(spreadsheet_id, tab).await?;
            sheets
                .write_range(
                    spreadsheet_id,
                    &a1::row_range(tab, 1, template.len()),
                    &[template.to_vec()],
                )
                .await?;
            tabs.refresh(spreadsheet_id).await?;
            info!(spreadsheet_id, tab, "created officer tab");
            return Ok(Some(Self::new(spreadsheet_id, tab, vec![template.to_vec()])));
        }
        let values = sheets.read_range(spreadsheet_id, &a1::tab_range(tab)).await?;
        let mut loaded = Self::new(spreadsheet_id, tab, values);
        if loaded.header.is_empty() && !template.is_empty() {
            sheets
                .write_range(
                    spreadsheet_id,
                    &a1::row_range(tab, 1, template.len()),
                    &[template.to_vec()],
                )
                .await?;
            loaded.header = HeaderIndex::from_header_row(template);
        }
        Ok(Some(loaded))
    }

    pub fn header(&self) -> &HeaderIndex {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    fn row_number(idx: usize) -> usize {
        idx + 2
    }

    fn is_identity_of(&self, idx: usize, lead: &Lead) -> bool {
        self.rows.get(idx).is_some_and(|row| {
            !is_blank_row(row) && self.header.lead_id(row, Self::row_number(idx)) == lead.id()
        })
    }

    /// Contact match for rows that carry no id of their own. A row with a
    /// different id belongs to another lead, whatever its email or phone.
    fn is_contact_of(&self, idx: usize, lead: &Lead, phone: &PhoneFormat) -> bool {
        let Some(row) = self.rows.get(idx) else {
            return false;
        };
        if is_blank_row(row) || !self.header.value(row, LeadField::Id).is_empty() {
            return false;
        }
        let email = self.header.value(row, LeadField::Email);
        if !email.is_empty() && email.eq_ignore_ascii_case(lead.intake.email.trim()) {
            return true;
        }
        let theirs = phone.canonicalize(self.header.value(row, LeadField::Phone));
        !theirs.is_empty() && theirs == phone.canonicalize(&lead.intake.phone)
    }

    /// Rows holding a copy of `lead`: those with its identity, or failing
    /// that, id-less rows with its email or canonical phone.
    pub fn copies_of(&self, lead: &Lead, phone: &PhoneFormat) -> Vec<usize> {
        let by_identity: Vec<usize> = (0..self.rows.len())
            .filter(|&idx| self.is_identity_of(idx, lead))
            .collect();
        if !by_identity.is_empty() {
            return by_identity;
        }
        (0..self.rows.len())
            .filter(|&idx| self.is_contact_of(idx, lead, phone))
            .collect()
    }

    pub fn find(&self, lead: &Lead, phone: &PhoneFormat) -> Option<usize> {
        self.copies_of(lead, phone).first().copied()
    }

    /// Refreshes the existing copy of `lead` with `update`, or writes a full
    /// copy into the first blank row (else after the last row). Returns the
    /// write to perform, if any.
    pub fn upsert(
        &mut self,
        lead: &Lead,
        update: &LeadUpdate,
        phone: &PhoneFormat,
    ) -> Option<CellUpdate> {
        let (idx, row) = match self.find(lead, phone) {
            Some(idx) => {
                let merged = self.header.merge_row(&self.rows[idx], update);
                (idx, merged)
            }
            None => {
                let mut copy = lead.clone();
                copy.intake.phone = phone.display(&lead.intake.phone);
                let idx = HeaderIndex::first_blank(&self.rows).unwrap_or(self.rows.len());
                (idx, self.header.build_row(&copy))
            }
        };
        self.put(idx, row)
    }

    /// Blanks every copy of `lead`. Row count is unchanged.
    pub fn blank(&mut self, lead: &Lead, phone: &PhoneFormat) -> Vec<CellUpdate> {
        self.copies_of(lead, phone)
            .into_iter()
            .filter_map(|idx| self.blank_row(idx))
            .collect()
    }

    pub fn blank_row(&mut self, idx: usize) -> Option<CellUpdate> {
        let width = self.header.width().max(self.rows.get(idx).map_or(0, Vec::len));
        self.put(idx, vec![String::new(); width])
    }

    fn put(&mut self, idx: usize, row: Vec<String>) -> Option<CellUpdate> {
        if self.rows.len() <= idx {
            self.rows.resize_with(idx + 1, Vec::new);
        }
        if self.rows[idx] == row {
            return None;
        }
        let width = row.len().max(1);
        let range = a1::row_range(&self.tab, Self::row_number(idx), width);
        self.rows[idx] = row.clone();
        debug!(spreadsheet_id = %self.spreadsheet_id, tab = %self.tab, row = Self::row_number(idx), "mirror row changed");
        Some(CellUpdate::row(range, row))
    }
}

/// Writes `updates` to one spreadsheet in chunks of at most `chunk_size`,
/// one call after another.
pub async fn write_chunked(
    sheets: &dyn SpreadsheetBackend,
    spreadsheet_id: &str,
    updates: &[CellUpdate],
    chunk_size: usize,
) -> Result<(), SyncError> {
    for chunk in updates.chunks(chunk_size.max(1)) {
        sheets.batch_write_cells(spreadsheet_id, chunk).await?;
    }
    Ok(())
}
