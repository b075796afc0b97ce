//! Relational-tier contracts, their PostgreSQL and in-memory implementations,
//! and the HTTP plumbing shared by remote backend clients.

pub mod http;
pub mod memory;
pub mod pg;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::{Lead, LeadKey, LeadUpdate, SyncError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{ApiClient, BackoffPolicy, HttpClientConfig, HttpError, TokenBucketConfig};
pub use memory::MemoryStore;
pub use pg::PgStore;

pub const CRATE_NAME: &str = "leadsync-storage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficerSpreadsheet {
    pub batch_name: String,
    pub officer_name: String,
    pub spreadsheet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTabs {
    pub tabs: Vec<String>,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Database(sqlx::Error::RowNotFound) => SyncError::NotFound(err.to_string()),
            StoreError::Database(
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed,
            )
            | StoreError::Unavailable(_) => SyncError::RemoteTransient(err.to_string()),
            StoreError::Database(_) | StoreError::Migrate(_) | StoreError::Json(_) => {
                SyncError::Rejected(err.to_string())
            }
        }
    }
}

/// Batch → spreadsheet bindings. A read model as far as the engine is concerned.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn admin_spreadsheet_id(&self, batch: &str) -> Result<Option<String>, StoreError>;

    /// Ordered by officer name.
    async fn officer_spreadsheets(&self, batch: &str)
        -> Result<Vec<OfficerSpreadsheet>, StoreError>;

    async fn officer_spreadsheet_id(
        &self,
        batch: &str,
        officer: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .officer_spreadsheets(batch)
            .await?
            .into_iter()
            .find(|o| o.officer_name.eq_ignore_ascii_case(officer.trim()))
            .map(|o| o.spreadsheet_id))
    }
}

/// Durable backing for the tab metadata cache, keyed by spreadsheet id.
#[async_trait]
pub trait TabCacheStore: Send + Sync {
    async fn cached_tabs(&self, spreadsheet_id: &str) -> Result<Option<CachedTabs>, StoreError>;
    async fn store_tabs(&self, spreadsheet_id: &str, tabs: &[String]) -> Result<(), StoreError>;
}

/// Relational projection of leads, unique on `(batch_name, sheet_name, sheet_lead_id)`.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn known_lead_ids(&self, batch: &str, sheet: &str) -> Result<HashSet<String>, StoreError>;

    /// Inserts full records. A key that already exists only has its intake
    /// fields refreshed.
    async fn insert_leads(&self, leads: &[Lead]) -> Result<usize, StoreError>;

    /// Overwrites intake fields only; operational fields are never touched.
    async fn update_intake(&self, leads: &[Lead]) -> Result<usize, StoreError>;

    /// Current assignee per known id. Ids the store does not know are absent
    /// from the result; a known lead with no assignee maps to `None`.
    async fn assignments(
        &self,
        batch: &str,
        sheet: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<String>>, StoreError>;

    /// Applies the operational part of `update`. Returns false when the lead is unknown.
    async fn update_operational(&self, key: &LeadKey, update: &LeadUpdate)
        -> Result<bool, StoreError>;

    async fn get_lead(&self, key: &LeadKey) -> Result<Option<Lead>, StoreError>;
}

/// Copies the operational fields of `update` onto `lead`, ignoring everything else.
pub fn apply_operational(lead: &mut Lead, update: &LeadUpdate) {
    for (field, value) in update.operational() {
        lead.set(field, value);
    }
}
