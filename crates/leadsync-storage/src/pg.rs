//! PostgreSQL implementation of the store traits.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::{canonicalize_phone, parse_flag, FollowUp, Lead, LeadKey, LeadUpdate};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::{
    apply_operational, CachedTabs, LeadStore, OfficerSpreadsheet, Registry, StoreError,
    TabCacheStore,
};

const LEAD_COLUMNS: &str = "batch_name, sheet_name, sheet_lead_id, sheet_row, \
     platform, full_name, phone, email, created_date, notes, answers, \
     status, assigned_to, priority, next_follow_up, call_feedback, \
     pdf_sent, wa_sent, email_sent, last_follow_up_comment, follow_ups";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub async fn upsert_batch(&self, batch: &str, admin_spreadsheet_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO batches (batch_name, admin_spreadsheet_id)
            VALUES ($1, $2)
            ON CONFLICT (batch_name)
            DO UPDATE SET admin_spreadsheet_id = EXCLUDED.admin_spreadsheet_id
            "#,
        )
        .bind(batch)
        .bind(admin_spreadsheet_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_officer(
        &self,
        batch: &str,
        officer: &str,
        spreadsheet_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO officer_spreadsheets (batch_name, officer_name, spreadsheet_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (batch_name, officer_name)
            DO UPDATE SET spreadsheet_id = EXCLUDED.spreadsheet_id
            "#,
        )
        .bind(batch)
        .bind(officer)
        .bind(spreadsheet_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_number_to_db(row_number: usize) -> i32 {
    i32::try_from(row_number).unwrap_or(i32::MAX)
}

fn flag_from_db(value: bool) -> String {
    if value { "TRUE".to_string() } else { String::new() }
}

fn lead_from_row(row: &PgRow) -> Result<Lead, StoreError> {
    let key = LeadKey::new(
        row.try_get::<String, _>("batch_name")?,
        row.try_get::<String, _>("sheet_name")?,
        row.try_get::<String, _>("sheet_lead_id")?,
    );
    let sheet_row: i32 = row.try_get("sheet_row")?;
    let mut lead = Lead::new(key, usize::try_from(sheet_row).unwrap_or(0));

    lead.intake.platform = row.try_get("platform")?;
    lead.intake.full_name = row.try_get("full_name")?;
    lead.intake.phone = row.try_get("phone")?;
    lead.intake.email = row.try_get("email")?;
    lead.intake.created_date = row.try_get("created_date")?;
    lead.intake.notes = row.try_get("notes")?;
    let answers: JsonValue = row.try_get("answers")?;
    lead.intake.answers = serde_json::from_value(answers)?;

    lead.ops.status = row.try_get("status")?;
    lead.ops.assigned_to = row
        .try_get::<Option<String>, _>("assigned_to")?
        .unwrap_or_default();
    lead.ops.priority = row.try_get("priority")?;
    lead.ops.next_follow_up = row.try_get("next_follow_up")?;
    lead.ops.call_feedback = row.try_get("call_feedback")?;
    lead.ops.pdf_sent = flag_from_db(row.try_get("pdf_sent")?);
    lead.ops.wa_sent = flag_from_db(row.try_get("wa_sent")?);
    lead.ops.email_sent = flag_from_db(row.try_get("email_sent")?);
    lead.ops.last_follow_up_comment = row.try_get("last_follow_up_comment")?;
    let follow_ups: JsonValue = row.try_get("follow_ups")?;
    lead.ops.follow_ups = serde_json::from_value::<Vec<FollowUp>>(follow_ups)?;
    Ok(lead)
}

fn nullable(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[async_trait]
impl Registry for PgStore {
    async fn admin_spreadsheet_id(&self, batch: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT admin_spreadsheet_id FROM batches WHERE batch_name = $1")
            .bind(batch)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("admin_spreadsheet_id")?),
            None => None,
        })
    }

    async fn officer_spreadsheets(
        &self,
        batch: &str,
    ) -> Result<Vec<OfficerSpreadsheet>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT batch_name, officer_name, spreadsheet_id
              FROM officer_spreadsheets
             WHERE batch_name = $1
             ORDER BY officer_name
            "#,
        )
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(OfficerSpreadsheet {
                batch_name: row.try_get("batch_name")?,
                officer_name: row.try_get("officer_name")?,
                spreadsheet_id: row.try_get("spreadsheet_id")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl TabCacheStore for PgStore {
    async fn cached_tabs(&self, spreadsheet_id: &str) -> Result<Option<CachedTabs>, StoreError> {
        let row = sqlx::query(
            "SELECT tabs, refreshed_at FROM sheet_tab_cache WHERE spreadsheet_id = $1",
        )
        .bind(spreadsheet_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let tabs: JsonValue = row.try_get("tabs")?;
        let refreshed_at: DateTime<Utc> = row.try_get("refreshed_at")?;
        Ok(Some(CachedTabs {
            tabs: serde_json::from_value(tabs)?,
            refreshed_at,
        }))
    }

    async fn store_tabs(&self, spreadsheet_id: &str, tabs: &[String]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sheet_tab_cache (spreadsheet_id, tabs, refreshed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (spreadsheet_id)
            DO UPDATE SET tabs = EXCLUDED.tabs, refreshed_at = EXCLUDED.refreshed_at
            "#,
        )
        .bind(spreadsheet_id)
        .bind(serde_json::to_value(tabs)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn known_lead_ids(&self, batch: &str, sheet: &str) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT sheet_lead_id FROM leads WHERE batch_name = $1 AND sheet_name = $2",
        )
        .bind(batch)
        .bind(sheet)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("sheet_lead_id").map_err(StoreError::from))
            .collect()
    }

    async fn insert_leads(&self, leads: &[Lead]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for lead in leads {
            sqlx::query(
                r#"
                INSERT INTO leads (
                    batch_name, sheet_name, sheet_lead_id, sheet_row,
                    platform, full_name, phone, phone_canonical, email, created_date, notes, answers,
                    status, assigned_to, priority, next_follow_up, call_feedback,
                    pdf_sent, wa_sent, email_sent, last_follow_up_comment, follow_ups
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
                ON CONFLICT (batch_name, sheet_name, sheet_lead_id)
                DO UPDATE SET
                    sheet_row = EXCLUDED.sheet_row,
                    platform = EXCLUDED.platform,
                    full_name = EXCLUDED.full_name,
                    phone = EXCLUDED.phone,
                    phone_canonical = EXCLUDED.phone_canonical,
                    email = EXCLUDED.email,
                    created_date = EXCLUDED.created_date,
                    notes = EXCLUDED.notes,
                    answers = EXCLUDED.answers,
                    synced_at = NOW()
                "#,
            )
            .bind(&lead.key.batch_name)
            .bind(&lead.key.sheet_name)
            .bind(&lead.key.sheet_lead_id)
            .bind(row_number_to_db(lead.row_number))
            .bind(&lead.intake.platform)
            .bind(&lead.intake.full_name)
            .bind(&lead.intake.phone)
            .bind(canonicalize_phone(&lead.intake.phone))
            .bind(&lead.intake.email)
            .bind(&lead.intake.created_date)
            .bind(&lead.intake.notes)
            .bind(serde_json::to_value(&lead.intake.answers)?)
            .bind(&lead.ops.status)
            .bind(nullable(&lead.ops.assigned_to))
            .bind(&lead.ops.priority)
            .bind(&lead.ops.next_follow_up)
            .bind(&lead.ops.call_feedback)
            .bind(parse_flag(&lead.ops.pdf_sent))
            .bind(parse_flag(&lead.ops.wa_sent))
            .bind(parse_flag(&lead.ops.email_sent))
            .bind(&lead.ops.last_follow_up_comment)
            .bind(serde_json::to_value(&lead.ops.follow_ups)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = leads.len(), "inserted leads");
        Ok(leads.len())
    }

    async fn update_intake(&self, leads: &[Lead]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0usize;
        for lead in leads {
            let result = sqlx::query(
                r#"
                UPDATE leads
                   SET sheet_row = $4,
                       platform = $5,
                       full_name = $6,
                       phone = $7,
                       phone_canonical = $8,
                       email = $9,
                       created_date = $10,
                       notes = $11,
                       answers = $12,
                       synced_at = NOW()
                 WHERE batch_name = $1 AND sheet_name = $2 AND sheet_lead_id = $3
                "#,
            )
            .bind(&lead.key.batch_name)
            .bind(&lead.key.sheet_name)
            .bind(&lead.key.sheet_lead_id)
            .bind(row_number_to_db(lead.row_number))
            .bind(&lead.intake.platform)
            .bind(&lead.intake.full_name)
            .bind(&lead.intake.phone)
            .bind(canonicalize_phone(&lead.intake.phone))
            .bind(&lead.intake.email)
            .bind(&lead.intake.created_date)
            .bind(&lead.intake.notes)
            .bind(serde_json::to_value(&lead.intake.answers)?)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn assignments(
        &self,
        batch: &str,
        sheet: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<String>>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT sheet_lead_id, assigned_to
              FROM leads
             WHERE batch_name = $1
               AND sheet_name = $2
               AND sheet_lead_id = ANY($3)
            "#,
        )
        .bind(batch)
        .bind(sheet)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("sheet_lead_id")?;
            let assignee: Option<String> = row.try_get("assigned_to")?;
            let assignee = assignee
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());
            out.insert(id, assignee);
        }
        Ok(out)
    }

    async fn update_operational(
        &self,
        key: &LeadKey,
        update: &LeadUpdate,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let select = format!(
            "SELECT {LEAD_COLUMNS} FROM leads \
             WHERE batch_name = $1 AND sheet_name = $2 AND sheet_lead_id = $3 FOR UPDATE"
        );
        let row = sqlx::query(&select)
            .bind(&key.batch_name)
            .bind(&key.sheet_name)
            .bind(&key.sheet_lead_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let mut lead = lead_from_row(&row)?;
        apply_operational(&mut lead, update);

        sqlx::query(
            r#"
            UPDATE leads
               SET status = $4,
                   assigned_to = $5,
                   priority = $6,
                   next_follow_up = $7,
                   call_feedback = $8,
                   pdf_sent = $9,
                   wa_sent = $10,
                   email_sent = $11,
                   last_follow_up_comment = $12,
                   follow_ups = $13,
                   updated_at = NOW()
             WHERE batch_name = $1 AND sheet_name = $2 AND sheet_lead_id = $3
            "#,
        )
        .bind(&key.batch_name)
        .bind(&key.sheet_name)
        .bind(&key.sheet_lead_id)
        .bind(&lead.ops.status)
        .bind(nullable(&lead.ops.assigned_to))
        .bind(&lead.ops.priority)
        .bind(&lead.ops.next_follow_up)
        .bind(&lead.ops.call_feedback)
        .bind(parse_flag(&lead.ops.pdf_sent))
        .bind(parse_flag(&lead.ops.wa_sent))
        .bind(parse_flag(&lead.ops.email_sent))
        .bind(&lead.ops.last_follow_up_comment)
        .bind(serde_json::to_value(&lead.ops.follow_ups)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_lead(&self, key: &LeadKey) -> Result<Option<Lead>, StoreError> {
        let select = format!(
            "SELECT {LEAD_COLUMNS} FROM leads \
             WHERE batch_name = $1 AND sheet_name = $2 AND sheet_lead_id = $3"
        );
        let row = sqlx::query(&select)
            .bind(&key.batch_name)
            .bind(&key.sheet_name)
            .bind(&key.sheet_lead_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_assignees_are_stored_as_null() {
        assert_eq!(nullable("  "), None);
        assert_eq!(nullable(" Alice "), Some("Alice"));
    }

    #[test]
    fn flags_round_trip_through_booleans() {
        assert_eq!(flag_from_db(parse_flag("yes")), "TRUE");
        assert_eq!(flag_from_db(parse_flag("")), "");
        assert_eq!(row_number_to_db(usize::MAX), i32::MAX);
    }
}
