use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::pipeline::compare::RenderedRow;
use crate::pipeline::normalize::NormalizedDataset;
use crate::types::{Dataset, Identifier};

/// Selection shared by both validation queries so the two result sets are comparable.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderQuery {
    pub table: Identifier,
    pub date_column: Identifier,
    pub run_date: NaiveDate,
    pub timestamp_columns: Vec<Identifier>,
    /// Join key. Empty means rows are paired by position.
    pub key_columns: Vec<Identifier>,
}

/// Result of a bulk overwrite load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub success: bool,
    pub chunks: usize,
    pub rows_written: usize,
}

// Source-side ports
#[async_trait]
pub trait SourcePort: Send + Sync {
    /// Every row of `table`, in store order.
    async fn fetch_rows(&self, table: &Identifier) -> Result<Dataset>;

    /// Rows matching `query`, timestamps rendered in Asia/Kolkata with a zone suffix.
    async fn fetch_rendered(&self, query: &RenderQuery) -> Result<Vec<RenderedRow>>;
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SourcePort>>;
}

// Warehouse-side ports
#[async_trait]
pub trait WarehousePort: Send + Sync {
    /// Replace the contents of `table` with `data`, creating it if missing.
    async fn bulk_write(&self, table: &Identifier, data: &NormalizedDataset) -> Result<WriteOutcome>;

    /// Rows matching `query`, stored naive-UTC timestamps rendered in Asia/Kolkata.
    async fn fetch_rendered(&self, query: &RenderQuery) -> Result<Vec<RenderedRow>>;
}

#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WarehousePort>>;
}
