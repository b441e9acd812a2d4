use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};

use crate::app::ports::{RenderQuery, SourceConnector, SourcePort};
use crate::config::SourceConfig;
use crate::constants::{LOCAL_ZONE_NAME, POSTGRES_RENDER_PATTERN};
use crate::error::{Result, Store, SyncError};
use crate::pipeline::compare::RenderedRow;
use crate::types::{Dataset, Identifier, Value};

/// Opens one Postgres connection per phase.
pub struct PostgresConnector {
    config: SourceConfig,
    connect_timeout: Duration,
    statement_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(config: SourceConfig, connect_timeout: Duration, statement_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
            statement_timeout,
        }
    }
}

#[async_trait]
impl SourceConnector for PostgresConnector {
    async fn connect(&self) -> Result<Box<dyn SourcePort>> {
        let source = PostgresSource::connect(&self.config, self.connect_timeout, self.statement_timeout).await?;
        Ok(Box::new(source))
    }
}

/// A live source connection. Dropping it stops the connection driver, closing the socket.
pub struct PostgresSource {
    client: Client,
    driver: JoinHandle<()>,
}

impl PostgresSource {
    pub async fn connect(
        config: &SourceConfig,
        connect_timeout: Duration,
        statement_timeout: Duration,
    ) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .application_name("warehouse_sync")
            .connect_timeout(connect_timeout);
        if let Some(password) = &config.password {
            pg.password(password);
        }

        info!(host = %config.host, db = %config.database, "Connecting to Postgres");
        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| SyncError::connection(Store::Source, e))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(&format!(
                "SET statement_timeout = {}; SET TIME ZONE '{}'",
                statement_timeout.as_millis(),
                LOCAL_ZONE_NAME
            ))
            .await
            .map_err(|e| SyncError::connection(Store::Source, e))?;

        Ok(Self { client, driver })
    }
}

impl Drop for PostgresSource {
    fn drop(&mut self) {
        self.driver.abort();
        debug!("Postgres connection closed");
    }
}

/// How a source column is read back into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    /// Anything else, cast to text in the select list.
    Other,
}

impl ColumnKind {
    fn of(ty: &Type) -> Self {
        match ty.name() {
            "bool" => ColumnKind::Bool,
            "int2" => ColumnKind::Int2,
            "int4" => ColumnKind::Int4,
            "int8" => ColumnKind::Int8,
            "float4" => ColumnKind::Float4,
            "float8" => ColumnKind::Float8,
            "numeric" => ColumnKind::Numeric,
            "text" | "varchar" | "bpchar" | "name" => ColumnKind::Text,
            "date" => ColumnKind::Date,
            "timestamp" => ColumnKind::Timestamp,
            "timestamptz" => ColumnKind::TimestampTz,
            _ => ColumnKind::Other,
        }
    }

    fn casts_to_text(&self) -> bool {
        matches!(self, ColumnKind::Numeric | ColumnKind::Other)
    }

    /// Kinds whose `text` cast matches the warehouse's `TO_VARCHAR` of the loaded column.
    fn usable_as_key(&self) -> bool {
        matches!(
            self,
            ColumnKind::Bool
                | ColumnKind::Int2
                | ColumnKind::Int4
                | ColumnKind::Int8
                | ColumnKind::Text
                | ColumnKind::Date
        )
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn read_value(row: &Row, idx: usize, kind: ColumnKind) -> std::result::Result<Value, tokio_postgres::Error> {
    let value = match kind {
        ColumnKind::Bool => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        ColumnKind::Int2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Int(v.into())),
        ColumnKind::Int4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Int(v.into())),
        ColumnKind::Int8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        ColumnKind::Float4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| Value::Float(v.into())),
        ColumnKind::Float8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        ColumnKind::Numeric => row.try_get::<_, Option<String>>(idx)?.map(Value::Numeric),
        ColumnKind::Text | ColumnKind::Other => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        ColumnKind::Date => row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date),
        ColumnKind::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::Timestamp),
        ColumnKind::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Value::TimestampTz(v.into())),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Validation query for the source side; `$1` is the run date.
pub fn render_sql(query: &RenderQuery) -> String {
    let mut select = Vec::new();
    for key in &query.key_columns {
        select.push(format!("CAST({} AS text)", key.lower()));
    }
    for col in &query.timestamp_columns {
        select.push(format!(
            "to_char(CAST({} AS timestamptz), '{}')",
            col.lower(),
            POSTGRES_RENDER_PATTERN
        ));
    }

    let order: Vec<String> = query
        .key_columns
        .iter()
        .chain(&query.timestamp_columns)
        .map(|c| format!("{} NULLS LAST", c.lower()))
        .collect();

    format!(
        "SELECT {} FROM {} WHERE CAST({} AS date) = $1 ORDER BY {}",
        select.join(", "),
        query.table.lower(),
        query.date_column.lower(),
        order.join(", ")
    )
}

#[async_trait]
impl SourcePort for PostgresSource {
    async fn fetch_rows(&self, table: &Identifier) -> Result<Dataset> {
        let stmt = self
            .client
            .prepare(&format!("SELECT * FROM {}", table.lower()))
            .await?;

        let kinds: Vec<ColumnKind> = stmt.columns().iter().map(|c| ColumnKind::of(c.type_())).collect();
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let select: Vec<String> = columns
            .iter()
            .zip(&kinds)
            .map(|(name, kind)| {
                if kind.casts_to_text() {
                    format!("CAST({} AS text)", quote(name))
                } else {
                    quote(name)
                }
            })
            .collect();

        let rows = self
            .client
            .query(&format!("SELECT {} FROM {}", select.join(", "), table.lower()), &[])
            .await?;

        let mut dataset = Dataset::new(columns);
        for row in &rows {
            let values = kinds
                .iter()
                .enumerate()
                .map(|(idx, kind)| read_value(row, idx, *kind))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            dataset.push_row(values)?;
        }
        info!(table = %table, rows = dataset.len(), "Fetched rows from Postgres");
        Ok(dataset)
    }

    async fn fetch_rendered(&self, query: &RenderQuery) -> Result<Vec<RenderedRow>> {
        if !query.key_columns.is_empty() {
            let keys: Vec<String> = query.key_columns.iter().map(|k| k.lower().to_string()).collect();
            let key_stmt = self
                .client
                .prepare(&format!("SELECT {} FROM {}", keys.join(", "), query.table.lower()))
                .await?;
            for (key, column) in query.key_columns.iter().zip(key_stmt.columns()) {
                if !ColumnKind::of(column.type_()).usable_as_key() {
                    return Err(SyncError::unsupported_key(key, column.type_().name()));
                }
            }
        }

        let sql = render_sql(query);
        debug!(%sql, "source validation query");
        let rows = self.client.query(&sql, &[&query.run_date]).await?;

        let keys = query.key_columns.len();
        let stamps = query.timestamp_columns.len();
        rows.iter()
            .map(|row| -> Result<RenderedRow> {
                let key = (0..keys)
                    .map(|i| row.try_get::<_, Option<String>>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let rendered = (keys..keys + stamps)
                    .map(|i| row.try_get::<_, Option<String>>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(RenderedRow::new(key, rendered))
            })
            .collect()
    }
}
