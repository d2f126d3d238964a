//! Import orchestration: drives a three-phase, dependency-ordered import
//! from one `SmartAnalysisResult`.
//!
//! Phases run strictly in sequence — referenced entities must exist
//! before the rows that reference them: (1) new halls, (2) new trainers
//! (patching unresolved trainer references with the created ids), then
//! (3) the primary-table rows. Batches within a phase are awaited one
//! after another; a failed batch never aborts the ones after it, and
//! nothing is rolled back — errors accumulate into one aggregate result.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::analyzer::SmartAnalysisResult;
use crate::sink::{BulkInsertSink, NewTrainer, TrainerCreator};
use crate::transform::{importable_rows, FieldResolution, PreviewRow};

/// Default rows per sink call. Bounds payload size and allows incremental
/// progress reporting.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// One failed row, with its offset within the whole phase (not within
/// the batch that carried it).
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub phase: &'static str,
    pub row: usize,
    pub message: String,
}

/// Aggregate result of a full import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub halls_created: usize,
    pub trainers_created: usize,
    pub rows_imported: usize,
    /// Total rows inserted across all phases.
    pub inserted: usize,
    /// Error rows never attempted.
    pub skipped: usize,
    pub total_attempted: usize,
    pub errors: Vec<RowError>,
}

/// Run the three import phases against the sinks. Not transactional:
/// rows created by earlier phases stay in place whatever happens later.
pub async fn run_import(
    analysis: &SmartAnalysisResult,
    sink: &dyn BulkInsertSink,
    trainer_creator: &dyn TrainerCreator,
    batch_size: usize,
) -> ImportResult {
    let mut result = ImportResult {
        skipped: analysis.primary.error_count,
        ..ImportResult::default()
    };

    // Phase 1: halls.
    let hall_records: Vec<Map<String, Value>> = analysis
        .new_halls
        .iter()
        .map(|h| name_record(&h.name))
        .collect();
    result.halls_created = insert_batched(
        sink,
        "halls",
        &hall_records,
        batch_size,
        "halls",
        &mut result.errors,
    )
    .await;

    // Phase 2: trainers. The identity system requires *some* phone value,
    // so trainers without a captured number get a counter-based placeholder.
    let to_create: Vec<NewTrainer> = analysis
        .new_trainers
        .iter()
        .enumerate()
        .map(|(i, t)| NewTrainer {
            name: t.name.clone(),
            phone: t
                .phone
                .clone()
                .unwrap_or_else(|| format!("050000{:04}", i + 1)),
        })
        .collect();

    let mut created_ids: HashMap<String, String> = HashMap::new();
    if !to_create.is_empty() {
        match trainer_creator.create_trainers(&to_create).await {
            Ok(outcome) => {
                result.trainers_created = outcome.created.len();
                for (name, id) in outcome.created {
                    created_ids.insert(name.trim().to_lowercase(), id);
                }
                for (i, trainer) in to_create.iter().enumerate() {
                    if created_ids.contains_key(&trainer.name.trim().to_lowercase()) {
                        continue;
                    }
                    let message = outcome
                        .errors
                        .iter()
                        .find(|e| e.contains(&trainer.name))
                        .cloned()
                        .unwrap_or_else(|| format!("{}: creation failed", trainer.name));
                    result.errors.push(RowError {
                        phase: "trainers",
                        row: i,
                        message,
                    });
                }
            }
            Err(e) => {
                warn!("Trainer creation call failed: {}", e);
                for (i, trainer) in to_create.iter().enumerate() {
                    result.errors.push(RowError {
                        phase: "trainers",
                        row: i,
                        message: format!("{}: {}", trainer.name, e),
                    });
                }
            }
        }
    }

    // Phase 3: primary rows, valid + warning only, with unresolved
    // trainer references patched from the just-created ids.
    let importable = importable_rows(&analysis.primary.rows, true);
    let records: Vec<Map<String, Value>> = importable
        .iter()
        .map(|row| patched_record(row, &created_ids))
        .collect();
    result.rows_imported = insert_batched(
        sink,
        analysis.primary.table.table_name(),
        &records,
        batch_size,
        "rows",
        &mut result.errors,
    )
    .await;

    result.inserted = result.halls_created + result.trainers_created + result.rows_imported;
    result.total_attempted = hall_records.len() + to_create.len() + records.len();

    info!(
        "Import complete: {} inserted, {} skipped, {} errors (of {} attempted)",
        result.inserted,
        result.skipped,
        result.errors.len(),
        result.total_attempted
    );

    result
}

/// A minimal record carrying the same name in all three languages.
fn name_record(name: &str) -> Map<String, Value> {
    let mut record = Map::new();
    for field in ["name_ar", "name_he", "name_en"] {
        record.insert(field.to_string(), Value::String(name.to_string()));
    }
    record
}

/// The row's sink payload, with any unresolved trainer reference whose
/// name was just created replaced by the real id.
fn patched_record(row: &PreviewRow, created_ids: &HashMap<String, String>) -> Map<String, Value> {
    let mut record = row.record.clone();
    if let Some(FieldResolution::Unresolved { text }) = row.resolutions.get("trainer_id") {
        if let Some(id) = created_ids.get(&text.trim().to_lowercase()) {
            record.insert("trainer_id".to_string(), Value::String(id.clone()));
        }
    }
    record
}

/// Insert records in fixed-size chunks, strictly in sequence. Errors are
/// re-indexed to the row's position within the whole phase (chunk offset
/// + in-chunk index). A chunk whose call fails outright becomes per-row
/// errors for every row it carried; later chunks still run.
async fn insert_batched(
    sink: &dyn BulkInsertSink,
    table: &str,
    records: &[Map<String, Value>],
    batch_size: usize,
    phase: &'static str,
    errors: &mut Vec<RowError>,
) -> usize {
    let mut inserted = 0;

    for (chunk_idx, chunk) in records.chunks(batch_size.max(1)).enumerate() {
        let chunk_offset = chunk_idx * batch_size.max(1);
        match sink.bulk_insert(table, chunk).await {
            Ok(outcome) => {
                inserted += outcome.inserted;
                for (offset, message) in outcome.errors {
                    errors.push(RowError {
                        phase,
                        row: chunk_offset + offset,
                        message,
                    });
                }
            }
            Err(e) => {
                warn!("Batch insert into {} failed: {}", table, e);
                for offset in 0..chunk.len() {
                    errors.push(RowError {
                        phase,
                        row: chunk_offset + offset,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{ExtractedEntity, SmartAnalysisResult, TableAnalysis};
    use crate::schema::TargetTable;
    use crate::sink::{BatchOutcome, TrainerCreationOutcome};
    use crate::transform::RowStatus;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records every call; fails configured global row offsets per table.
    #[derive(Default)]
    struct MemorySink {
        calls: Mutex<Vec<(String, usize)>>,
        rows: Mutex<Vec<(String, Map<String, Value>)>>,
        fail_at: Mutex<HashMap<String, Vec<usize>>>,
        seen: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl BulkInsertSink for MemorySink {
        async fn bulk_insert(
            &self,
            table: &str,
            records: &[Map<String, Value>],
        ) -> Result<BatchOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((table.to_string(), records.len()));

            let mut seen = self.seen.lock().unwrap();
            let base = *seen.entry(table.to_string()).or_insert(0);
            *seen.get_mut(table).unwrap() += records.len();
            drop(seen);

            let fail = self
                .fail_at
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default();

            let mut outcome = BatchOutcome::default();
            for (offset, record) in records.iter().enumerate() {
                if fail.contains(&(base + offset)) {
                    outcome
                        .errors
                        .push((offset, "duplicate key value".to_string()));
                } else {
                    outcome.inserted += 1;
                    self.rows
                        .lock()
                        .unwrap()
                        .push((table.to_string(), record.clone()));
                }
            }
            Ok(outcome)
        }
    }

    #[derive(Default)]
    struct MemoryTrainerCreator {
        received: Mutex<Vec<NewTrainer>>,
        fail_names: Vec<String>,
    }

    #[async_trait]
    impl TrainerCreator for MemoryTrainerCreator {
        async fn create_trainers(&self, trainers: &[NewTrainer]) -> Result<TrainerCreationOutcome> {
            self.received.lock().unwrap().extend(trainers.iter().cloned());
            let mut outcome = TrainerCreationOutcome::default();
            for (i, t) in trainers.iter().enumerate() {
                if self.fail_names.contains(&t.name) {
                    outcome.errors.push(format!("{}: phone already in use", t.name));
                } else {
                    outcome.created.insert(t.name.clone(), format!("t-new-{}", i));
                }
            }
            Ok(outcome)
        }
    }

    fn preview_row(index: usize, name: &str, status: RowStatus) -> PreviewRow {
        let mut record = Map::new();
        record.insert("name_ar".to_string(), json!(name));
        PreviewRow {
            index,
            raw: Map::new(),
            record,
            resolutions: BTreeMap::new(),
            status,
            messages: Vec::new(),
        }
    }

    fn analysis_with(rows: Vec<PreviewRow>) -> SmartAnalysisResult {
        let error_count = rows
            .iter()
            .filter(|r| r.status == RowStatus::Error)
            .count();
        let valid_count = rows.len() - error_count;
        SmartAnalysisResult {
            id: "an_test".to_string(),
            source_file: "test.csv".to_string(),
            sheet_name: "Sheet1".to_string(),
            candidates: Vec::new(),
            primary: TableAnalysis {
                table: TargetTable::Trainees,
                mappings: Vec::new(),
                rows,
                valid_count,
                warning_count: 0,
                error_count,
            },
            trainers: Vec::new(),
            halls: Vec::new(),
            classes: Vec::new(),
            new_trainers: Vec::new(),
            new_halls: Vec::new(),
            new_classes: Vec::new(),
            total_records: 0,
        }
    }

    #[tokio::test]
    async fn test_phases_run_in_dependency_order() {
        let mut analysis = analysis_with(vec![preview_row(0, "A", RowStatus::Valid)]);
        analysis.new_halls = vec![ExtractedEntity {
            name: "Main Hall".to_string(),
            phone: None,
            occurrences: 1,
        }];
        analysis.new_trainers = vec![ExtractedEntity {
            name: "Karim".to_string(),
            phone: Some("0501234567".to_string()),
            occurrences: 1,
        }];

        let sink = MemorySink::default();
        let creator = MemoryTrainerCreator::default();
        let result = run_import(&analysis, &sink, &creator, 10).await;

        assert_eq!(result.halls_created, 1);
        assert_eq!(result.trainers_created, 1);
        assert_eq!(result.rows_imported, 1);
        assert_eq!(result.inserted, 3);
        assert!(result.errors.is_empty());

        // Halls are inserted before the primary rows, trainers in between.
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls[0].0, "halls");
        assert_eq!(calls[1].0, "trainees");
        let received = creator.received.lock().unwrap();
        assert_eq!(received[0].name, "Karim");
        assert_eq!(received[0].phone, "0501234567");
    }

    #[tokio::test]
    async fn test_placeholder_phone_for_phoneless_trainer() {
        let mut analysis = analysis_with(Vec::new());
        analysis.new_trainers = vec![ExtractedEntity {
            name: "Nadia".to_string(),
            phone: None,
            occurrences: 1,
        }];

        let sink = MemorySink::default();
        let creator = MemoryTrainerCreator::default();
        run_import(&analysis, &sink, &creator, 10).await;

        let received = creator.received.lock().unwrap();
        assert_eq!(received[0].phone, "0500000001");
    }

    #[tokio::test]
    async fn test_unresolved_trainer_patched_with_created_id() {
        let mut row = preview_row(0, "Lions", RowStatus::Warning);
        row.resolutions.insert(
            "trainer_id".to_string(),
            FieldResolution::Unresolved {
                text: "Karim".to_string(),
            },
        );
        let mut analysis = analysis_with(vec![row]);
        analysis.primary.table = TargetTable::Classes;
        analysis.primary.warning_count = 1;
        analysis.primary.valid_count = 0;
        analysis.new_trainers = vec![ExtractedEntity {
            name: "Karim".to_string(),
            phone: None,
            occurrences: 1,
        }];

        let sink = MemorySink::default();
        let creator = MemoryTrainerCreator::default();
        let result = run_import(&analysis, &sink, &creator, 10).await;
        assert_eq!(result.rows_imported, 1);

        let rows = sink.rows.lock().unwrap();
        let (table, record) = rows.iter().find(|(t, _)| t == "classes").unwrap();
        assert_eq!(table, "classes");
        assert_eq!(record["trainer_id"], json!("t-new-0"));
    }

    #[tokio::test]
    async fn test_error_rows_excluded_and_counted_as_skipped() {
        let analysis = analysis_with(vec![
            preview_row(0, "A", RowStatus::Valid),
            preview_row(1, "B", RowStatus::Error),
            preview_row(2, "C", RowStatus::Warning),
        ]);

        let sink = MemorySink::default();
        let creator = MemoryTrainerCreator::default();
        let result = run_import(&analysis, &sink, &creator, 10).await;

        assert_eq!(result.rows_imported, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.total_attempted, 2);
    }

    #[tokio::test]
    async fn test_batch_error_offsets_are_whole_import_offsets() {
        // 25 records, batch size 10, record 12 fails: the aggregate error
        // must carry offset 12, not 2 (its offset within the second batch).
        let rows: Vec<PreviewRow> = (0..25)
            .map(|i| preview_row(i, &format!("r{}", i), RowStatus::Valid))
            .collect();
        let analysis = analysis_with(rows);

        let sink = MemorySink::default();
        sink.fail_at
            .lock()
            .unwrap()
            .insert("trainees".to_string(), vec![12]);
        let creator = MemoryTrainerCreator::default();
        let result = run_import(&analysis, &sink, &creator, 10).await;

        assert_eq!(result.rows_imported, 24);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].phase, "rows");
        assert_eq!(result.errors[0].row, 12);

        // Three batches of 10/10/5.
        let calls = sink.calls.lock().unwrap();
        let batches: Vec<usize> = calls
            .iter()
            .filter(|(t, _)| t == "trainees")
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(batches, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_failed_trainer_reported_but_import_continues() {
        let mut row = preview_row(0, "A", RowStatus::Valid);
        row.resolutions.insert(
            "trainer_id".to_string(),
            FieldResolution::Unresolved {
                text: "Bad Trainer".to_string(),
            },
        );
        let mut analysis = analysis_with(vec![row]);
        analysis.new_trainers = vec![ExtractedEntity {
            name: "Bad Trainer".to_string(),
            phone: None,
            occurrences: 1,
        }];

        let sink = MemorySink::default();
        let creator = MemoryTrainerCreator {
            received: Mutex::new(Vec::new()),
            fail_names: vec!["Bad Trainer".to_string()],
        };
        let result = run_import(&analysis, &sink, &creator, 10).await;

        assert_eq!(result.trainers_created, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].phase, "trainers");
        // The row still imports, just with its trainer reference unset.
        assert_eq!(result.rows_imported, 1);
        let rows = sink.rows.lock().unwrap();
        let (_, record) = &rows[0];
        assert!(record.get("trainer_id").is_none());
    }
}
