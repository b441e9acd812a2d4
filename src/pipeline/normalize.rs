use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::constants::default_timestamp_columns;
use crate::error::{Result, Store, SyncError};
use crate::timezone::{self, SourceTimestamp};
use crate::types::{Dataset, Identifier, Value};

/// A dataset whose column names are upper-cased and whose timestamp columns hold naive-UTC
/// values. Only [`TimestampNormalizer::normalize`] can build one, so a value can never be
/// shifted twice in the same run.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDataset(Dataset);

impl NormalizedDataset {
    pub fn columns(&self) -> &[String] {
        &self.0.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.0.rows
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_dataset(&self) -> &Dataset {
        &self.0
    }

    pub fn into_inner(self) -> Dataset {
        self.0
    }
}

/// Folds column names to upper case and rewrites the timestamp columns as naive UTC,
/// treating naive source readings as Asia/Kolkata local time.
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    columns: Vec<String>,
}

impl Default for TimestampNormalizer {
    fn default() -> Self {
        Self {
            columns: default_timestamp_columns(),
        }
    }
}

impl TimestampNormalizer {
    pub fn new(columns: &[Identifier]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.upper().to_string()).collect(),
        }
    }

    pub fn timestamp_columns(&self) -> &[String] {
        &self.columns
    }

    /// Consumes `dataset`; any unparseable value fails the whole call.
    #[instrument(skip_all, fields(rows = dataset.len()))]
    pub fn normalize(&self, mut dataset: Dataset) -> Result<NormalizedDataset> {
        fold_column_names(&mut dataset)?;

        for column in &self.columns {
            let Some(idx) = dataset.column_index(column) else {
                debug!(column = %column, "timestamp column absent, skipping");
                continue;
            };
            for (row_no, row) in dataset.rows.iter_mut().enumerate() {
                row[idx] = normalize_value(column, row_no, &row[idx])?;
            }
            debug!(column = %column, "converted to naive UTC");
        }

        Ok(NormalizedDataset(dataset))
    }
}

fn fold_column_names(dataset: &mut Dataset) -> Result<()> {
    let mut seen = HashSet::with_capacity(dataset.columns.len());
    for name in dataset.columns.iter_mut() {
        *name = name.to_uppercase();
        if !seen.insert(name.clone()) {
            return Err(SyncError::read(
                Store::Source,
                format!("column {name} appears twice after upper-casing"),
            ));
        }
    }
    Ok(())
}

fn normalize_value(column: &str, row: usize, value: &Value) -> Result<Value> {
    let fail = |reason: String| SyncError::Timestamp {
        column: column.to_string(),
        row,
        value: value.display(),
        reason,
    };

    let source = match value {
        Value::Null => return Ok(Value::Null),
        Value::Timestamp(naive) => SourceTimestamp::Naive(*naive),
        Value::TimestampTz(zoned) => SourceTimestamp::Zoned(*zoned),
        Value::Date(date) => match date.and_hms_opt(0, 0, 0) {
            Some(midnight) => SourceTimestamp::Naive(midnight),
            None => return Err(fail("date has no midnight".to_string())),
        },
        Value::Text(text) => timezone::parse_timestamp(text)
            .ok_or_else(|| fail("unrecognized timestamp format".to_string()))?,
        _ => return Err(fail("value is not a timestamp".to_string())),
    };

    timezone::to_naive_utc(source).map(Value::Timestamp).map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDateTime};

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    fn sample() -> Dataset {
        let mut ds = Dataset::new(vec!["run_dt".into(), "i_ts".into(), "u_ts".into(), "fii_net".into()]);
        ds.push_row(vec![
            Value::Text("2025-11-24".into()),
            Value::Timestamp(naive("2025-11-24 10:00:00.000")),
            Value::TimestampTz(DateTime::parse_from_rfc3339("2025-11-24T04:30:00Z").unwrap()),
            Value::Float(-1250.5),
        ])
        .unwrap();
        ds.push_row(vec![
            Value::Text("2025-11-24".into()),
            Value::Null,
            Value::Text("2025-11-24 18:45:10.250".into()),
            Value::Float(310.0),
        ])
        .unwrap();
        ds
    }

    #[test]
    fn upper_cases_columns_and_converts_timestamps() {
        let out = TimestampNormalizer::default().normalize(sample()).unwrap();

        assert_eq!(out.columns(), &["RUN_DT", "I_TS", "U_TS", "FII_NET"]);
        assert_eq!(out.len(), 2);

        let rows = out.rows();
        assert_eq!(rows[0][1], Value::Timestamp(naive("2025-11-24 04:30:00.000")));
        assert_eq!(rows[0][2], Value::Timestamp(naive("2025-11-24 04:30:00.000")));
        assert_eq!(rows[1][1], Value::Null);
        assert_eq!(rows[1][2], Value::Timestamp(naive("2025-11-24 13:15:10.250")));
    }

    #[test]
    fn leaves_other_columns_and_order_alone() {
        let input = sample();
        let out = TimestampNormalizer::default().normalize(input.clone()).unwrap();
        for (before, after) in input.rows.iter().zip(out.rows()) {
            assert_eq!(before[0], after[0]);
            assert_eq!(before[3], after[3]);
        }
    }

    #[test]
    fn missing_timestamp_columns_are_skipped() {
        let mut ds = Dataset::new(vec!["category".into()]);
        ds.push_row(vec![Value::Text("FII".into())]).unwrap();
        let out = TimestampNormalizer::default().normalize(ds).unwrap();
        assert_eq!(out.rows()[0][0], Value::Text("FII".into()));
    }

    #[test]
    fn bad_value_fails_the_whole_dataset() {
        let mut ds = sample();
        ds.rows[1][2] = Value::Text("next tuesday".into());
        let err = TimestampNormalizer::default().normalize(ds).unwrap_err();
        match err {
            SyncError::Timestamp { column, row, value, .. } => {
                assert_eq!(column, "U_TS");
                assert_eq!(row, 1);
                assert_eq!(value, "next tuesday");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_temporal_value_is_rejected() {
        let mut ds = sample();
        ds.rows[0][1] = Value::Int(1732442400);
        assert!(matches!(
            TimestampNormalizer::default().normalize(ds),
            Err(SyncError::Timestamp { .. })
        ));
    }

    #[test]
    fn colliding_names_after_folding_are_rejected() {
        let ds = Dataset::new(vec!["i_ts".into(), "I_TS".into()]);
        assert!(matches!(
            TimestampNormalizer::default().normalize(ds),
            Err(SyncError::Read { .. })
        ));
    }

    #[test]
    fn custom_column_list_is_upper_cased() {
        let cols = Identifier::parse_list("created_at").unwrap();
        let normalizer = TimestampNormalizer::new(&cols);
        assert_eq!(normalizer.timestamp_columns(), &["CREATED_AT"]);

        let mut ds = Dataset::new(vec!["created_at".into()]);
        ds.push_row(vec![Value::Timestamp(naive("2025-01-01 05:30:00.000"))]).unwrap();
        let out = normalizer.normalize(ds).unwrap();
        assert_eq!(out.rows()[0][0], Value::Timestamp(naive("2025-01-01 00:00:00.000")));
    }
}
