//! Single-lead updates: the assignment state machine.
//!
//! The admin row is the record of who owns a lead. It is written first; the
//! store projection and the officer mirrors follow as best-effort steps whose
//! failures are reported, never rolled back.

use leadsync_core::a1;
use leadsync_core::{
    is_sentinel, Assignment, HeaderIndex, Lead, LeadField, LeadKey, LeadUpdate, SyncError,
    DUPLICATE_SENTINEL,
};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::duplicates::PhoneOwner;
use crate::mirror::{write_chunked, OfficerTab};
use crate::{require_name, LeadSync};

#[derive(Debug, Clone, Serialize)]
pub struct LeadUpdateOutcome {
    /// The lead as written to the admin spreadsheet.
    pub lead: Lead,
    pub previous_assignee: String,
    /// Set when the requested assignee was replaced by the duplicate sentinel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Failures of the follow-up writes. The admin write itself succeeded.
    pub warnings: Vec<String>,
}

/// The admin row a lead lives in.
struct AdminRow {
    spreadsheet_id: String,
    header: HeaderIndex,
    row: Vec<String>,
    row_number: usize,
}

impl LeadSync {
    /// Applies `update` to one lead and replicates the result.
    ///
    /// A non-empty `assigned_to` whose phone is already owned by another lead
    /// of the batch is replaced by the `Duplicate` sentinel.
    pub async fn update_batch_lead(
        &self,
        batch: &str,
        sheet: &str,
        lead_id: &str,
        update: LeadUpdate,
    ) -> Result<LeadUpdateOutcome, SyncError> {
        require_name("sheet", sheet)?;
        require_name("lead id", lead_id)?;
        let span = info_span!("update_lead", batch, sheet, lead_id);
        self.apply_lead_update(batch, sheet.trim(), lead_id.trim(), update)
            .instrument(span)
            .await
    }

    async fn apply_lead_update(
        &self,
        batch: &str,
        sheet: &str,
        lead_id: &str,
        mut update: LeadUpdate,
    ) -> Result<LeadUpdateOutcome, SyncError> {
        match update.remove(LeadField::Id) {
            Some(id) if id.trim() != lead_id => {
                return Err(SyncError::InvalidInput(format!(
                    "lead id is immutable ({lead_id:?} cannot become {id:?})"
                )));
            }
            _ => {}
        }
        if update.is_empty() {
            return Err(SyncError::InvalidInput("update carries no fields".into()));
        }

        let admin = self.admin_spreadsheet(batch).await?;
        let found = self.find_admin_row(&admin, sheet, lead_id).await?;
        if update.assigned_to().is_some() {
            found.header.require(LeadField::AssignedTo, sheet)?;
        }

        let key = LeadKey::new(batch, sheet, lead_id);
        let mut old = found.header.parse_row(&found.row, batch, sheet, found.row_number);
        old.key = key.clone();
        let previous_assignee = old.ops.assigned_to.clone();

        let duplicate_of = self.check_duplicate(batch, &old, &mut update).await?;

        let merged = found.header.merge_row(&found.row, &update);
        self.sheets
            .write_range(
                &found.spreadsheet_id,
                &a1::row_range(sheet, found.row_number, merged.len()),
                &[merged.clone()],
            )
            .await?;
        let mut lead = found.header.parse_row(&merged, batch, sheet, found.row_number);
        lead.key = key.clone();
        let unmapped = found.header.unmapped(&update);
        if !unmapped.is_empty() {
            debug!(?unmapped, "update fields without admin columns were not written");
        }
        info!(assigned_to = %lead.ops.assigned_to, "admin row written");

        self.patch_duplicate_index(batch, &admin, &old, &lead).await;

        let mut warnings = Vec::new();
        match self.leads.update_operational(&key, &update).await {
            Ok(true) => {}
            Ok(false) => debug!("lead not in store yet, projection left to the next pull"),
            Err(err) => {
                warn!(error = %err, "store projection write failed");
                warnings.push(format!("store projection: {err}"));
            }
        }

        self.replicate_mirrors(batch, sheet, &found.header, &old, &lead, &update, &mut warnings)
            .await;

        Ok(LeadUpdateOutcome {
            lead,
            previous_assignee,
            duplicate_of,
            warnings,
        })
    }

    async fn find_admin_row(
        &self,
        admin: &str,
        sheet: &str,
        lead_id: &str,
    ) -> Result<AdminRow, SyncError> {
        let values = self.sheets.read_range(admin, &a1::tab_range(sheet)).await?;
        let (header, data) = HeaderIndex::split(&values);
        if header.is_empty() {
            return Err(SyncError::schema_mismatch(sheet, LeadField::Id.header()));
        }
        data.iter()
            .enumerate()
            .filter(|(_, row)| !leadsync_core::codec::is_blank_row(row))
            .find(|(idx, row)| header.lead_id(row, idx + 2) == lead_id)
            .map(|(idx, row)| (idx + 2, row.clone()))
            .map(|(row_number, row)| AdminRow {
                spreadsheet_id: admin.to_string(),
                header: header.clone(),
                row,
                row_number,
            })
            .ok_or_else(|| SyncError::NotFound(format!("lead {lead_id:?} not found in tab {sheet:?}")))
    }

    /// Rewrites the update's assignee to the sentinel when another lead of the
    /// batch already holds the phone. Returns the owner found.
    async fn check_duplicate(
        &self,
        batch: &str,
        old: &Lead,
        update: &mut LeadUpdate,
    ) -> Result<Option<String>, SyncError> {
        let Some(requested) = update.assigned_to().map(str::trim) else {
            return Ok(None);
        };
        if requested.is_empty() || is_sentinel(requested) {
            return Ok(None);
        }

        let phone = if old.intake.phone.trim().is_empty() {
            update.get(LeadField::Phone).unwrap_or_default()
        } else {
            old.intake.phone.as_str()
        };
        let canonical = self.config.phone.canonicalize(phone);
        if canonical.is_empty() {
            return Ok(None);
        }

        if self.config.strict_duplicate_check {
            self.duplicates.invalidate(batch).await;
        }
        let owner = self
            .duplicates
            .with_index(batch, |index| {
                match index.active_owner_excluding(&canonical, &old.key.sheet_name, old.id()) {
                    Some(owner) => Ok(Some(owner.assignee.clone())),
                    None => index.incomplete_error().map_or(Ok(None), Err),
                }
            })
            .await??;

        if let Some(owner) = &owner {
            info!(
                requested,
                owner = %owner,
                phone = %canonical,
                "phone already assigned, marking lead as duplicate"
            );
            update.set(LeadField::AssignedTo, DUPLICATE_SENTINEL);
        }
        Ok(owner)
    }

    async fn patch_duplicate_index(&self, batch: &str, admin: &str, old: &Lead, new: &Lead) {
        let phone = &self.config.phone;
        let old_phone = phone.canonicalize(&old.intake.phone);
        let new_phone = phone.canonicalize(&new.intake.phone);
        if old_phone == new_phone && old.ops.assigned_to == new.ops.assigned_to {
            return;
        }
        self.duplicates
            .release(batch, &old_phone, &old.key.sheet_name, old.id())
            .await;
        if !new.ops.assigned_to.trim().is_empty() {
            let owner = PhoneOwner {
                assignee: new.ops.assigned_to.trim().to_string(),
                spreadsheet_id: admin.to_string(),
                sheet_name: new.key.sheet_name.clone(),
                lead_id: new.id().to_string(),
            };
            self.duplicates.record(batch, &new_phone, owner).await;
        }
    }

    /// Fans the lead in from its previous officer and out to its current one.
    #[allow(clippy::too_many_arguments)]
    async fn replicate_mirrors(
        &self,
        batch: &str,
        sheet: &str,
        admin_header: &HeaderIndex,
        old: &Lead,
        lead: &Lead,
        update: &LeadUpdate,
        warnings: &mut Vec<String>,
    ) {
        let previous = old.assignment();
        let current = lead.assignment();
        let phone = &self.config.phone;

        if let Assignment::AssignedTo(officer) = &previous {
            let moved = current
                .officer()
                .map_or(true, |now| !now.eq_ignore_ascii_case(officer));
            if moved {
                if let Err(err) = self.fan_in(batch, sheet, officer, old).await {
                    warn!(officer = %officer, error = %err, "could not blank previous mirror");
                    warnings.push(format!("mirror for {officer}: {err}"));
                }
            }
        }

        // Refresh with the effective assignee so the mirror never shows the raw request.
        let mut mirror_update = update.clone();
        mirror_update.set(LeadField::AssignedTo, lead.ops.assigned_to.clone());

        if let Assignment::AssignedTo(officer) = &current {
            match self.officer_spreadsheet(batch, officer).await {
                Ok(spreadsheet_id) => {
                    let opened = OfficerTab::open(
                        self.sheets.as_ref(),
                        &self.tabs,
                        &spreadsheet_id,
                        sheet,
                        admin_header.headers(),
                        true,
                    )
                    .await;
                    let result = match opened {
                        Ok(Some(mut tab)) => match tab.upsert(lead, &mirror_update, phone) {
                            Some(write) => {
                                write_chunked(self.sheets.as_ref(), &spreadsheet_id, &[write], 1).await
                            }
                            None => Ok(()),
                        },
                        Ok(None) => Ok(()),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = result {
                        warn!(officer = %officer, error = %err, "could not write mirror");
                        warnings.push(format!("mirror for {officer}: {err}"));
                    }
                }
                Err(err) => {
                    warn!(officer = %officer, error = %err, "officer has no spreadsheet");
                    warnings.push(format!("mirror for {officer}: {err}"));
                }
            }
        }
    }

    async fn fan_in(
        &self,
        batch: &str,
        sheet: &str,
        officer: &str,
        old: &Lead,
    ) -> Result<(), SyncError> {
        let spreadsheet_id = self.officer_spreadsheet(batch, officer).await?;
        let opened = OfficerTab::open(
            self.sheets.as_ref(),
            &self.tabs,
            &spreadsheet_id,
            sheet,
            &[],
            false,
        )
        .await?;
        let Some(mut tab) = opened else {
            return Ok(());
        };
        let writes = tab.blank(old, &self.config.phone);
        if !writes.is_empty() {
            info!(officer, rows = writes.len(), "blanked previous mirror");
        }
        write_chunked(self.sheets.as_ref(), &spreadsheet_id, &writes, self.config.write_chunk_size)
            .await
    }

    pub(crate) async fn officer_spreadsheet(
        &self,
        batch: &str,
        officer: &str,
    ) -> Result<String, SyncError> {
        self.registry
            .officer_spreadsheet_id(batch, officer)
            .await?
            .ok_or_else(|| {
                SyncError::NotFound(format!("officer {officer:?} has no spreadsheet in batch {batch:?}"))
            })
    }
}
