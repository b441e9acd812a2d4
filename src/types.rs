use crate::error::{Result, SyncError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"));

/// A table or column name that is safe to splice into SQL text.
///
/// Source-side statements use it unquoted (Postgres folds to lower case);
/// warehouse-side statements quote the upper-cased form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if IDENTIFIER_RE.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(SyncError::InvalidIdentifier(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn upper(&self) -> Identifier {
        Identifier(self.0.to_uppercase())
    }

    pub fn lower(&self) -> Identifier {
        Identifier(self.0.to_lowercase())
    }

    /// Double-quoted upper-case form for warehouse statements.
    pub fn quoted_upper(&self) -> String {
        format!("\"{}\"", self.0.to_uppercase())
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse_list(list: &str) -> Result<Vec<Identifier>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Identifier::new)
            .collect()
    }
}

impl TryFrom<String> for Identifier {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Identifier::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single cell as read from the source store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision number kept in its textual form.
    Numeric(String),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Human-readable form used in error messages and reports.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Numeric(s) | Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::TimestampTz(ts) => ts.to_rfc3339(),
        }
    }
}

/// Rows of one table, all sharing `columns`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row; its width must match the column set.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SyncError::read(
                crate::error::Store::Source,
                format!(
                    "row has {} values but dataset has {} columns",
                    row.len(),
                    self.columns.len()
                ),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_plain_names() {
        let id = Identifier::new("t_nse_fii_dii_eq_data").unwrap();
        assert_eq!(id.upper().as_str(), "T_NSE_FII_DII_EQ_DATA");
        assert_eq!(id.quoted_upper(), "\"T_NSE_FII_DII_EQ_DATA\"");
    }

    #[test]
    fn identifier_rejects_injection() {
        assert!(Identifier::new("t; DROP TABLE x").is_err());
        assert!(Identifier::new("1abc").is_err());
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("a\"b").is_err());
    }

    #[test]
    fn parse_list_skips_blanks() {
        let ids = Identifier::parse_list(" category, run_dt ,,").unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "category");
        assert_eq!(ids[1].as_str(), "run_dt");
    }

    #[test]
    fn push_row_rejects_wrong_width() {
        let mut ds = Dataset::new(vec!["A".into(), "B".into()]);
        assert!(ds.push_row(vec![Value::Int(1)]).is_err());
        ds.push_row(vec![Value::Int(1), Value::Null]).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.column_values("B").unwrap(), vec![&Value::Null]);
    }
}
