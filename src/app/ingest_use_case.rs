use tracing::{info, instrument};

use crate::app::ports::{SourceConnector, WarehouseConnector};
use crate::error::{Result, Store, SyncError};
use crate::metrics::IngestMetrics;
use crate::pipeline::normalize::TimestampNormalizer;
use crate::types::Identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The source table was empty; the warehouse was left untouched.
    NoData,
    Loaded {
        table: Identifier,
        rows_written: usize,
        chunks: usize,
    },
}

/// Copies one source table into the warehouse, overwriting the target.
///
/// Each store is connected only for its own phase and released before the next begins.
pub struct IngestUseCase {
    source: Box<dyn SourceConnector>,
    warehouse: Box<dyn WarehouseConnector>,
    normalizer: TimestampNormalizer,
}

impl IngestUseCase {
    pub fn new(
        source: Box<dyn SourceConnector>,
        warehouse: Box<dyn WarehouseConnector>,
        normalizer: TimestampNormalizer,
    ) -> Self {
        Self {
            source,
            warehouse,
            normalizer,
        }
    }

    #[instrument(skip(self), fields(table = %table))]
    pub async fn run(&self, table: &Identifier) -> Result<IngestOutcome> {
        let dataset = {
            let conn = self.source.connect().await?;
            conn.fetch_rows(table).await?
        };
        IngestMetrics::record_rows_read(dataset.len());

        if dataset.is_empty() {
            info!("No data found in source table, skipping load");
            return Ok(IngestOutcome::NoData);
        }
        info!(rows = dataset.len(), columns = dataset.columns.len(), "Read source table");

        let normalized = self.normalizer.normalize(dataset)?;
        let target = table.upper();

        let outcome = {
            let conn = self.warehouse.connect().await?;
            conn.bulk_write(&target, &normalized).await?
        };

        if !outcome.success {
            return Err(SyncError::write(
                Store::Warehouse,
                format!("bulk load into {target} reported failure"),
            ));
        }
        if outcome.rows_written != normalized.len() {
            return Err(SyncError::write(
                Store::Warehouse,
                format!(
                    "wrote {} of {} rows into {target}",
                    outcome.rows_written,
                    normalized.len()
                ),
            ));
        }
        IngestMetrics::record_load(outcome.rows_written, outcome.chunks);

        info!(
            rows = outcome.rows_written,
            chunks = outcome.chunks,
            "Loaded {} rows into {}",
            outcome.rows_written,
            target
        );
        Ok(IngestOutcome::Loaded {
            table: target,
            rows_written: outcome.rows_written,
            chunks: outcome.chunks,
        })
    }
}
