use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::app::ports::{RenderQuery, SourceConnector, WarehouseConnector};
use crate::error::{Result, SyncError};
use crate::metrics::ValidateMetrics;
use crate::pipeline::compare::{compare_rendered, Mismatch, Pairing, ValidationOutcome};

/// Summary of one validation run, serialized for `validate --report`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub table: String,
    pub run_date: String,
    pub columns: Vec<String>,
    pub key_columns: Vec<String>,
    pub source_rows: usize,
    pub warehouse_rows: usize,
    pub outcome: ValidationOutcome,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.outcome.is_clean()
    }
}

/// Checks that every timestamp read back from the warehouse renders the same as the
/// source value for the run date.
pub struct ValidateUseCase {
    source: Box<dyn SourceConnector>,
    warehouse: Box<dyn WarehouseConnector>,
}

impl ValidateUseCase {
    pub fn new(source: Box<dyn SourceConnector>, warehouse: Box<dyn WarehouseConnector>) -> Self {
        Self { source, warehouse }
    }

    #[instrument(skip(self, query), fields(table = %query.table, run_date = %query.run_date))]
    pub async fn run(&self, query: &RenderQuery) -> Result<ValidationReport> {
        // timestamp keys render in Kolkata on one side and as stored UTC on the other
        if let Some(key) = query
            .key_columns
            .iter()
            .find(|k| query.timestamp_columns.iter().any(|c| c.upper() == k.upper()))
        {
            return Err(SyncError::unsupported_key(key, "timestamp"));
        }

        let source_rows = {
            let conn = self.source.connect().await?;
            conn.fetch_rendered(query).await?
        };
        let warehouse_rows = {
            let conn = self.warehouse.connect().await?;
            conn.fetch_rendered(query).await?
        };
        ValidateMetrics::record_rows_read(source_rows.len(), warehouse_rows.len());

        let columns: Vec<String> = query
            .timestamp_columns
            .iter()
            .map(|c| c.upper().to_string())
            .collect();
        let pairing = if query.key_columns.is_empty() {
            Pairing::Positional
        } else {
            Pairing::Keyed
        };

        let outcome = compare_rendered(&source_rows, &warehouse_rows, &columns, pairing);
        match &outcome {
            ValidationOutcome::CountMismatch {
                source_rows,
                warehouse_rows,
            } => warn!(source_rows, warehouse_rows, "Row counts differ, skipping comparison"),
            ValidationOutcome::Compared {
                comparisons,
                mismatches,
                ..
            } => {
                for mismatch in mismatches {
                    log_mismatch(mismatch);
                }
                ValidateMetrics::record_comparison(*comparisons, mismatches.len());
                info!(comparisons, mismatches = mismatches.len(), "Comparison finished");
            }
        }

        Ok(ValidationReport {
            table: query.table.to_string(),
            run_date: query.run_date.format("%Y-%m-%d").to_string(),
            columns,
            key_columns: query.key_columns.iter().map(|k| k.upper().to_string()).collect(),
            source_rows: source_rows.len(),
            warehouse_rows: warehouse_rows.len(),
            outcome,
        })
    }
}

fn log_mismatch(mismatch: &Mismatch) {
    match mismatch {
        Mismatch::Field(m) => warn!(
            row = m.position,
            key = ?m.key,
            column = %m.column,
            source = ?m.source_raw,
            normalized = ?m.source_normalized,
            warehouse = ?m.warehouse,
            "Timestamp mismatch"
        ),
        Mismatch::Unpaired {
            side,
            position,
            key,
        } => warn!(%side, row = position, key = ?key, "Row has no counterpart"),
    }
}
