//! Backing-store collaborators: the reference-data provider, the
//! bulk-insert sink, and the dedicated trainer-creation path.
//!
//! The pipeline only ever talks to these traits; `SupabaseStore`
//! implements all three over the Supabase REST API. Inserts go row by
//! row so failures can be attributed to their offset within the call —
//! partial success within a batch is expected and handled upstream.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::resolver::{RefData, RefRecord};

/// Supplies the reference snapshot of existing trainers/halls/classes
/// used for FK resolution. Read-only for one analysis+import cycle.
#[async_trait]
pub trait ReferenceProvider: Send + Sync {
    async fn reference_data(&self) -> Result<RefData>;
}

/// Result of one bulk-insert call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    /// (offset within this call, error message) per failed row.
    pub errors: Vec<(usize, String)>,
}

/// Accepts a table name plus an array of field maps; individual rows may
/// fail independently.
#[async_trait]
pub trait BulkInsertSink: Send + Sync {
    async fn bulk_insert(&self, table: &str, records: &[Map<String, Value>])
        -> Result<BatchOutcome>;
}

/// A trainer queued for creation before the primary import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrainer {
    pub name: String,
    pub phone: String,
}

/// Result of a trainer-creation call: name → created id, plus per-name
/// error strings for the rest.
#[derive(Debug, Clone, Default)]
pub struct TrainerCreationOutcome {
    pub created: HashMap<String, String>,
    pub errors: Vec<String>,
}

/// Trainer identity requires a dedicated creation path (distinct from
/// plain bulk insert) in the backing store.
#[async_trait]
pub trait TrainerCreator: Send + Sync {
    async fn create_trainers(&self, trainers: &[NewTrainer]) -> Result<TrainerCreationOutcome>;
}

// ============================================================================
// Supabase implementation
// ============================================================================

/// Supabase REST client implementing all three collaborator traits.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRow {
    id: String,
}

impl SupabaseStore {
    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("SUPABASE_URL").map_err(|_| anyhow!("SUPABASE_URL not set"))?;
        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| anyhow!("SUPABASE_SERVICE_ROLE_KEY not set"))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            service_role_key,
        })
    }

    /// Helper: GET from the REST API.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/rest/v1/{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} failed: {} - {}", path, status, text));
        }

        Ok(resp.json().await?)
    }

    /// Insert one record; returns the created row when representation is
    /// requested, None otherwise.
    async fn insert_row(
        &self,
        table: &str,
        record: &Value,
        want_representation: bool,
    ) -> Result<Option<CreatedRow>> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let prefer = if want_representation {
            "return=representation"
        } else {
            "return=minimal"
        };

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
            .header("Prefer", prefer)
            .json(record)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("insert into {} failed: {} - {}", table, status, text));
        }

        if want_representation {
            let rows: Vec<CreatedRow> = resp.json().await?;
            Ok(rows.into_iter().next())
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl ReferenceProvider for SupabaseStore {
    async fn reference_data(&self) -> Result<RefData> {
        let trainers: Vec<RefRecord> = self
            .get_json("trainers?select=id,name_ar,name_he,name_en,phone")
            .await?;
        let halls: Vec<RefRecord> = self
            .get_json("halls?select=id,name_ar,name_he,name_en")
            .await?;
        let classes: Vec<RefRecord> = self
            .get_json("classes?select=id,name_ar,name_he,name_en")
            .await?;

        info!(
            "Reference snapshot: {} trainers, {} halls, {} classes",
            trainers.len(),
            halls.len(),
            classes.len()
        );

        Ok(RefData {
            trainers,
            halls,
            classes,
        })
    }
}

#[async_trait]
impl BulkInsertSink for SupabaseStore {
    async fn bulk_insert(
        &self,
        table: &str,
        records: &[Map<String, Value>],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for (offset, record) in records.iter().enumerate() {
            match self
                .insert_row(table, &Value::Object(record.clone()), false)
                .await
            {
                Ok(_) => outcome.inserted += 1,
                Err(e) => outcome.errors.push((offset, e.to_string())),
            }
        }

        debug!(
            "Inserted {}/{} rows into {} ({} failed)",
            outcome.inserted,
            records.len(),
            table,
            outcome.errors.len()
        );
        Ok(outcome)
    }
}

#[async_trait]
impl TrainerCreator for SupabaseStore {
    async fn create_trainers(&self, trainers: &[NewTrainer]) -> Result<TrainerCreationOutcome> {
        let mut outcome = TrainerCreationOutcome::default();

        for trainer in trainers {
            let record = json!({
                "name_ar": trainer.name,
                "name_he": trainer.name,
                "name_en": trainer.name,
                "phone": trainer.phone,
            });

            match self.insert_row("trainers", &record, true).await {
                Ok(Some(row)) => {
                    outcome.created.insert(trainer.name.clone(), row.id);
                }
                Ok(None) => outcome
                    .errors
                    .push(format!("{}: created but no id returned", trainer.name)),
                Err(e) => outcome.errors.push(format!("{}: {}", trainer.name, e)),
            }
        }

        info!(
            "Created {}/{} trainers",
            outcome.created.len(),
            trainers.len()
        );
        Ok(outcome)
    }
}
