//! Snowflake statement text for the overwrite load.

use crate::types::{Dataset, Identifier, Value};

/// Largest precision a Snowflake NUMBER column accepts.
const MAX_PRECISION: u8 = 38;

/// Warehouse column type inferred from the values of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    /// Exact decimal sized to the widest integer part and longest fraction seen.
    Numeric { int_digits: u8, scale: u8 },
    Varchar,
    Date,
    TimestampNtz,
    TimestampTz,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "NUMBER(38,0)".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Numeric { scale, .. } => format!("NUMBER({MAX_PRECISION},{scale})"),
            ColumnType::Varchar => "VARCHAR".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::TimestampNtz => "TIMESTAMP_NTZ(9)".to_string(),
            ColumnType::TimestampTz => "TIMESTAMP_TZ(9)".to_string(),
        }
    }

    fn of(value: &Value) -> Option<ColumnType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            // NaN and Infinity only fit a FLOAT column
            Value::Numeric(s) => Some(match decimal_shape(s) {
                Some((int_digits, scale)) => numeric(int_digits, scale),
                None => ColumnType::Float,
            }),
            Value::Text(_) => Some(ColumnType::Varchar),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Timestamp(_) => Some(ColumnType::TimestampNtz),
            Value::TimestampTz(_) => Some(ColumnType::TimestampTz),
        }
    }

    fn merge(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (
                Numeric { int_digits: ai, scale: a },
                Numeric { int_digits: bi, scale: b },
            ) => numeric(ai.max(bi), a.max(b)),
            // i64 needs up to 19 integer digits
            (Integer, Numeric { int_digits, scale }) | (Numeric { int_digits, scale }, Integer) => {
                numeric(int_digits.max(19), scale)
            }
            (Integer, Float) | (Float, Integer) | (Numeric { .. }, Float) | (Float, Numeric { .. }) => Float,
            _ => Varchar,
        }
    }
}

/// NUMBER(38, scale) when the digits fit, FLOAT otherwise.
fn numeric(int_digits: u8, scale: u8) -> ColumnType {
    if u16::from(int_digits) + u16::from(scale) > u16::from(MAX_PRECISION) {
        ColumnType::Float
    } else {
        ColumnType::Numeric { int_digits, scale }
    }
}

/// Integer and fraction digit counts of plain decimal text such as `-2210.105`.
fn decimal_shape(text: &str) -> Option<(u8, u8)> {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let int_digits = int_part.trim_start_matches('0').len().max(1);
    Some((
        u8::try_from(int_digits).unwrap_or(u8::MAX),
        u8::try_from(frac_part.len()).unwrap_or(u8::MAX),
    ))
}

/// One type per column; conflicting kinds widen to VARCHAR, all-null columns are VARCHAR.
pub fn infer_column_types(data: &Dataset) -> Vec<ColumnType> {
    (0..data.columns.len())
        .map(|idx| {
            data.rows
                .iter()
                .filter_map(|r| ColumnType::of(&r[idx]))
                .reduce(ColumnType::merge)
                .unwrap_or(ColumnType::Varchar)
        })
        .collect()
}

fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "''"))
}

fn is_plain_number(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
}

/// Literal for `value` in a column of type `ty`.
pub fn literal(value: &Value, ty: ColumnType) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }
    if ty == ColumnType::Varchar {
        return quote_text(&value.display());
    }
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{f:?}"),
        Value::Float(f) => format!("{}::FLOAT", quote_text(&f.to_string())),
        Value::Numeric(s) if is_plain_number(s) => s.clone(),
        Value::Numeric(s) => format!("{}::FLOAT", quote_text(s)),
        Value::Text(s) => quote_text(s),
        Value::Date(d) => format!("'{}'::DATE", d.format("%Y-%m-%d")),
        Value::Timestamp(ts) => format!("'{}'::TIMESTAMP_NTZ", ts.format("%Y-%m-%d %H:%M:%S%.9f")),
        Value::TimestampTz(ts) => format!(
            "'{}'::TIMESTAMP_TZ",
            ts.format("%Y-%m-%dT%H:%M:%S%.9f%:z")
        ),
    }
}

pub fn create_or_replace_sql(table: &Identifier, columns: &[String], types: &[ColumnType]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .zip(types)
        .map(|(c, t)| format!("{} {}", quote_column(c), t.sql()))
        .collect();
    format!(
        "CREATE OR REPLACE TABLE {} ({})",
        table.quoted_upper(),
        defs.join(", ")
    )
}

pub fn insert_sql(table: &Identifier, columns: &[String], rows: &[Vec<Value>], types: &[ColumnType]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_column(c)).collect();
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let vals: Vec<String> = row
                .iter()
                .zip(types)
                .map(|(v, t)| literal(v, *t))
                .collect();
            format!("({})", vals.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.quoted_upper(),
        cols.join(", "),
        tuples.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn infers_and_widens_types() {
        let mut ds = Dataset::new(vec![
            "A".into(),
            "B".into(),
            "C".into(),
            "D".into(),
            "E".into(),
        ]);
        ds.push_row(vec![
            Value::Int(1),
            Value::Timestamp(naive("2025-11-24 04:30:00.000")),
            Value::Null,
            Value::Int(2),
            Value::Text("x".into()),
        ])
        .unwrap();
        ds.push_row(vec![
            Value::Float(1.5),
            Value::Null,
            Value::Null,
            Value::Numeric("2.50".into()),
            Value::Int(3),
        ])
        .unwrap();

        assert_eq!(
            infer_column_types(&ds),
            vec![
                ColumnType::Float,
                ColumnType::TimestampNtz,
                ColumnType::Varchar,
                ColumnType::Numeric {
                    int_digits: 19,
                    scale: 2
                },
                ColumnType::Varchar,
            ]
        );
    }

    fn numeric_column(values: &[&str]) -> ColumnType {
        let mut ds = Dataset::new(vec!["FII_NET".into()]);
        for v in values {
            ds.push_row(vec![Value::Numeric(v.to_string())]).unwrap();
        }
        infer_column_types(&ds)[0]
    }

    #[test]
    fn numeric_scale_follows_the_longest_fraction() {
        let ty = numeric_column(&["2210.10", "-0.12345678901234", "15"]);
        assert_eq!(
            ty,
            ColumnType::Numeric {
                int_digits: 4,
                scale: 14
            }
        );
        assert_eq!(ty.sql(), "NUMBER(38,14)");
        assert_eq!(literal(&Value::Numeric("-0.12345678901234".into()), ty), "-0.12345678901234");
    }

    #[test]
    fn nan_widens_numeric_column_to_float() {
        let ty = numeric_column(&["2210.10", "NaN"]);
        assert_eq!(ty, ColumnType::Float);
        assert_eq!(ty.sql(), "FLOAT");
        assert_eq!(literal(&Value::Numeric("NaN".into()), ty), "'NaN'::FLOAT");
        assert_eq!(literal(&Value::Numeric("2210.10".into()), ty), "2210.10");
    }

    #[test]
    fn decimals_wider_than_number_fall_back_to_float() {
        let wide = format!("{}.{}", "9".repeat(30), "1".repeat(9));
        assert_eq!(numeric_column(&[&wide]), ColumnType::Float);
        assert_eq!(numeric_column(&["1e5"]), ColumnType::Float);
    }

    #[test]
    fn literals_are_escaped_and_typed() {
        assert_eq!(literal(&Value::Text("O'Neil".into()), ColumnType::Varchar), "'O''Neil'");
        assert_eq!(literal(&Value::Null, ColumnType::Integer), "NULL");
        assert_eq!(literal(&Value::Int(3), ColumnType::Varchar), "'3'");
        assert_eq!(literal(&Value::Float(2.0), ColumnType::Float), "2.0");
        assert_eq!(
            literal(
                &Value::Timestamp(naive("2025-11-24 04:30:00.123")),
                ColumnType::TimestampNtz
            ),
            "'2025-11-24 04:30:00.123000000'::TIMESTAMP_NTZ"
        );
        assert_eq!(
            literal(
                &Value::Date(NaiveDate::from_ymd_opt(2025, 11, 24).unwrap()),
                ColumnType::Date
            ),
            "'2025-11-24'::DATE"
        );
    }

    #[test]
    fn statements_quote_upper_case_names() {
        let table = Identifier::new("t_nse_fii_dii_eq_data__STAGE").unwrap();
        let cols = vec!["I_TS".to_string(), "FII_NET".to_string()];
        let types = vec![ColumnType::TimestampNtz, ColumnType::Float];
        assert_eq!(
            create_or_replace_sql(&table, &cols, &types),
            "CREATE OR REPLACE TABLE \"T_NSE_FII_DII_EQ_DATA__STAGE\" (\"I_TS\" TIMESTAMP_NTZ(9), \"FII_NET\" FLOAT)"
        );
        let rows = vec![vec![Value::Null, Value::Float(-10.25)]];
        assert_eq!(
            insert_sql(&table, &cols, &rows, &types),
            "INSERT INTO \"T_NSE_FII_DII_EQ_DATA__STAGE\" (\"I_TS\", \"FII_NET\") VALUES (NULL, -10.25)"
        );
    }
}
