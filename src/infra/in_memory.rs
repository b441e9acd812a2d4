use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::app::ports::{
    RenderQuery, SourceConnector, SourcePort, WarehouseConnector, WarehousePort, WriteOutcome,
};
use crate::error::{Result, Store, SyncError};
use crate::pipeline::compare::RenderedRow;
use crate::pipeline::normalize::NormalizedDataset;
use crate::timezone::{self, SourceTimestamp};
use crate::types::{Dataset, Identifier, Value};

#[derive(Default)]
struct SourceState {
    table: String,
    dataset: Dataset,
    connects: usize,
}

/// In-memory source store holding one table.
///
/// Cloning shares state, so a test can keep a handle while the use case owns another.
#[derive(Clone, Default)]
pub struct InMemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl InMemorySource {
    pub fn new(table: &Identifier, dataset: Dataset) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState {
                table: table.as_str().to_lowercase(),
                dataset,
                connects: 0,
            })),
        }
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn replace_dataset(&self, dataset: Dataset) {
        self.state.lock().unwrap().dataset = dataset;
    }

    fn dataset_for(&self, table: &Identifier) -> Result<Dataset> {
        let state = self.state.lock().unwrap();
        if state.table != table.as_str().to_lowercase() {
            return Err(SyncError::read(
                Store::Source,
                format!("relation \"{table}\" does not exist"),
            ));
        }
        Ok(state.dataset.clone())
    }
}

#[async_trait]
impl SourceConnector for InMemorySource {
    async fn connect(&self) -> Result<Box<dyn SourcePort>> {
        self.state.lock().unwrap().connects += 1;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl SourcePort for InMemorySource {
    async fn fetch_rows(&self, table: &Identifier) -> Result<Dataset> {
        let dataset = self.dataset_for(table)?;
        debug!(rows = dataset.len(), "in-memory source read");
        Ok(dataset)
    }

    async fn fetch_rendered(&self, query: &RenderQuery) -> Result<Vec<RenderedRow>> {
        let dataset = self.dataset_for(&query.table)?;
        check_key_values(&dataset, query)?;
        render_selection(
            &dataset,
            query,
            Store::Source,
            |v| source_timestamp(v).and_then(|ts| timezone::to_naive_utc(ts).ok()),
            |v| match v {
                Value::Null => Ok(None),
                other => source_timestamp(other)
                    .ok_or_else(|| format!("{} is not a timestamp", other.display()))
                    .and_then(timezone::render_source)
                    .map(Some),
            },
        )
    }
}

#[derive(Default)]
struct WarehouseState {
    tables: BTreeMap<String, Dataset>,
    connects: usize,
    writes: usize,
    fail_writes: bool,
}

/// In-memory warehouse with overwrite-load semantics. Also backs `ingest --dry-run`.
#[derive(Clone, Default)]
pub struct InMemoryWarehouse {
    state: Arc<Mutex<WarehouseState>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Make every following `bulk_write` fail without touching stored tables.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn table(&self, name: &str) -> Option<Dataset> {
        self.state.lock().unwrap().tables.get(&name.to_uppercase()).cloned()
    }

    /// Overwrite one stored cell. Returns false if the table, row or column is missing.
    pub fn set_value(&self, table: &str, row: usize, column: &str, value: Value) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(data) = state.tables.get_mut(&table.to_uppercase()) else {
            return false;
        };
        let Some(idx) = data.column_index(&column.to_uppercase()) else {
            return false;
        };
        match data.rows.get_mut(row) {
            Some(r) => {
                r[idx] = value;
                true
            }
            None => false,
        }
    }

    pub fn delete_row(&self, table: &str, row: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.tables.get_mut(&table.to_uppercase()) {
            Some(data) if row < data.rows.len() => {
                data.rows.remove(row);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl WarehouseConnector for InMemoryWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehousePort>> {
        self.state.lock().unwrap().connects += 1;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl WarehousePort for InMemoryWarehouse {
    async fn bulk_write(&self, table: &Identifier, data: &NormalizedDataset) -> Result<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(SyncError::write(Store::Warehouse, "load rejected"));
        }
        state.writes += 1;
        state
            .tables
            .insert(table.upper().to_string(), data.as_dataset().clone());
        debug!(table = %table, rows = data.len(), "in-memory warehouse overwritten");
        Ok(WriteOutcome {
            success: true,
            chunks: 1,
            rows_written: data.len(),
        })
    }

    async fn fetch_rendered(&self, query: &RenderQuery) -> Result<Vec<RenderedRow>> {
        let dataset = self
            .table(query.table.as_str())
            .ok_or_else(|| {
                SyncError::read(
                    Store::Warehouse,
                    format!("table {} does not exist", query.table.quoted_upper()),
                )
            })?;
        render_selection(
            &dataset,
            query,
            Store::Warehouse,
            |v| match v {
                Value::Timestamp(n) => Some(*n),
                _ => None,
            },
            |v| match v {
                Value::Null => Ok(None),
                Value::Timestamp(n) => Ok(Some(timezone::render_local(*n))),
                other => Err(format!("{} is not TIMESTAMP_NTZ", other.display())),
            },
        )
    }
}

fn source_timestamp(value: &Value) -> Option<SourceTimestamp> {
    match value {
        Value::Timestamp(n) => Some(SourceTimestamp::Naive(*n)),
        Value::TimestampTz(z) => Some(SourceTimestamp::Zoned(*z)),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(SourceTimestamp::Naive),
        Value::Text(s) => timezone::parse_timestamp(s),
        _ => None,
    }
}

/// Same rule the Postgres source applies to key column types.
fn check_key_values(dataset: &Dataset, query: &RenderQuery) -> Result<()> {
    for key in &query.key_columns {
        let idx = column(dataset, key, Store::Source)?;
        for row in &dataset.rows {
            let kind = match &row[idx] {
                Value::Numeric(_) => "numeric",
                Value::Float(_) => "float8",
                Value::Timestamp(_) => "timestamp",
                Value::TimestampTz(_) => "timestamptz",
                _ => continue,
            };
            return Err(SyncError::unsupported_key(key, kind));
        }
    }
    Ok(())
}

fn value_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Timestamp(n) => Some(n.date()),
        Value::TimestampTz(z) => Some(z.date_naive()),
        Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
}

fn column(dataset: &Dataset, name: &Identifier, store: Store) -> Result<usize> {
    dataset
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name.as_str()))
        .ok_or_else(|| SyncError::read(store, format!("column {name} does not exist")))
}

/// Filter on the run date, order by key then timestamps (nulls last), and render.
fn render_selection(
    dataset: &Dataset,
    query: &RenderQuery,
    store: Store,
    instant: impl Fn(&Value) -> Option<NaiveDateTime>,
    render: impl Fn(&Value) -> std::result::Result<Option<String>, String>,
) -> Result<Vec<RenderedRow>> {
    let date_idx = column(dataset, &query.date_column, store)?;
    let key_idx = query
        .key_columns
        .iter()
        .map(|k| column(dataset, k, store))
        .collect::<Result<Vec<_>>>()?;
    let ts_idx = query
        .timestamp_columns
        .iter()
        .map(|c| column(dataset, c, store))
        .collect::<Result<Vec<_>>>()?;

    let mut selected: Vec<&Vec<Value>> = dataset
        .rows
        .iter()
        .filter(|r| value_date(&r[date_idx]) == Some(query.run_date))
        .collect();

    selected.sort_by(|a, b| {
        let keys = key_idx
            .iter()
            .map(|&i| nulls_last(&key_text(&a[i]), &key_text(&b[i])))
            .find(|o| o.is_ne());
        keys.or_else(|| {
            ts_idx
                .iter()
                .map(|&i| nulls_last(&instant(&a[i]), &instant(&b[i])))
                .find(|o| o.is_ne())
        })
        .unwrap_or(Ordering::Equal)
    });

    selected
        .into_iter()
        .map(|row| {
            let key = key_idx.iter().map(|&i| key_text(&row[i])).collect();
            let stamps = ts_idx
                .iter()
                .map(|&i| render(&row[i]).map_err(|e| SyncError::read(store, e)))
                .collect::<Result<Vec<_>>>()?;
            Ok(RenderedRow::new(key, stamps))
        })
        .collect()
}

fn key_text(value: &Value) -> Option<String> {
    (!value.is_null()).then(|| value.display())
}

fn nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::TimestampNormalizer;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    fn table() -> Identifier {
        Identifier::new("t_nse_fii_dii_eq_data").unwrap()
    }

    fn dataset() -> Dataset {
        let mut ds = Dataset::new(vec!["run_dt".into(), "category".into(), "i_ts".into(), "u_ts".into()]);
        let date = NaiveDate::from_ymd_opt(2025, 11, 24).unwrap();
        ds.push_row(vec![
            Value::Date(date),
            Value::Text("FII".into()),
            Value::Timestamp(naive("2025-11-24 18:00:00.000")),
            Value::Null,
        ])
        .unwrap();
        ds.push_row(vec![
            Value::Date(date),
            Value::Text("DII".into()),
            Value::Timestamp(naive("2025-11-24 10:00:00.123")),
            Value::Timestamp(naive("2025-11-24 10:05:00.000")),
        ])
        .unwrap();
        ds.push_row(vec![
            Value::Date(date.pred_opt().unwrap()),
            Value::Text("FII".into()),
            Value::Timestamp(naive("2025-11-23 10:00:00.000")),
            Value::Null,
        ])
        .unwrap();
        ds
    }

    fn query(keys: &str) -> RenderQuery {
        RenderQuery {
            table: table(),
            date_column: Identifier::new("RUN_DT").unwrap(),
            run_date: NaiveDate::from_ymd_opt(2025, 11, 24).unwrap(),
            timestamp_columns: Identifier::parse_list("I_TS,U_TS").unwrap(),
            key_columns: Identifier::parse_list(keys).unwrap(),
        }
    }

    #[tokio::test]
    async fn source_renders_local_time_with_zone() {
        let source = InMemorySource::new(&table(), dataset());
        let rows = source.fetch_rendered(&query("")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stamps[0].as_deref(), Some("24-Nov-2025 10:00:00.123 AM IST"));
        assert_eq!(rows[1].stamps[0].as_deref(), Some("24-Nov-2025 06:00:00.000 PM IST"));
        assert_eq!(rows[1].stamps[1], None);
    }

    #[tokio::test]
    async fn keyed_selection_carries_keys() {
        let source = InMemorySource::new(&table(), dataset());
        let rows = source.fetch_rendered(&query("category")).await.unwrap();
        assert_eq!(rows[0].key, vec![Some("DII".to_string())]);
        assert_eq!(rows[1].key, vec![Some("FII".to_string())]);
    }

    #[tokio::test]
    async fn unknown_table_is_a_read_error() {
        let source = InMemorySource::new(&table(), dataset());
        let other = Identifier::new("other").unwrap();
        assert!(matches!(
            source.fetch_rows(&other).await,
            Err(SyncError::Read { store: Store::Source, .. })
        ));
    }

    #[tokio::test]
    async fn warehouse_overwrites_and_renders_in_kolkata() {
        let warehouse = InMemoryWarehouse::new();
        let normalized = TimestampNormalizer::default().normalize(dataset()).unwrap();

        warehouse.bulk_write(&table(), &normalized).await.unwrap();
        warehouse.bulk_write(&table(), &normalized).await.unwrap();
        assert_eq!(warehouse.writes(), 2);
        assert_eq!(warehouse.table("t_nse_fii_dii_eq_data").unwrap().len(), 3);

        let rows = warehouse.fetch_rendered(&query("")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stamps[0].as_deref(), Some("24-Nov-2025 10:00:00.123 AM"));
        assert_eq!(rows[0].stamps[1].as_deref(), Some("24-Nov-2025 10:05:00.000 AM"));
    }

    #[tokio::test]
    async fn failed_write_leaves_previous_contents() {
        let warehouse = InMemoryWarehouse::new();
        let normalized = TimestampNormalizer::default().normalize(dataset()).unwrap();
        warehouse.bulk_write(&table(), &normalized).await.unwrap();

        warehouse.fail_writes(true);
        let mut smaller = dataset();
        smaller.rows.truncate(1);
        let smaller = TimestampNormalizer::default().normalize(smaller).unwrap();
        assert!(warehouse.bulk_write(&table(), &smaller).await.is_err());
        assert_eq!(warehouse.table("T_NSE_FII_DII_EQ_DATA").unwrap().len(), 3);
    }
}
