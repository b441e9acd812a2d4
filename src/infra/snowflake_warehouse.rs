use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::ports::{RenderQuery, WarehouseConnector, WarehousePort, WriteOutcome};
use crate::config::WarehouseConfig;
use crate::constants::{LOCAL_ZONE_NAME, SNOWFLAKE_RENDER_PATTERN, STAGE_SUFFIX};
use crate::error::{Result, Store, SyncError};
use crate::infra::sql;
use crate::pipeline::compare::RenderedRow;
use crate::pipeline::normalize::NormalizedDataset;
use crate::types::Identifier;

/// Tuning for statement execution and loading.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    pub poll_interval: Duration,
    pub insert_batch_rows: usize,
}

pub struct SnowflakeConnector {
    config: WarehouseConfig,
    settings: LoadSettings,
}

impl SnowflakeConnector {
    pub fn new(config: WarehouseConfig, settings: LoadSettings) -> Self {
        Self { config, settings }
    }
}

#[async_trait]
impl WarehouseConnector for SnowflakeConnector {
    async fn connect(&self) -> Result<Box<dyn WarehousePort>> {
        let warehouse = SnowflakeWarehouse::connect(self.config.clone(), self.settings.clone()).await?;
        Ok(Box::new(warehouse))
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    code: Option<String>,
    message: Option<String>,
    sql_state: Option<String>,
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    num_rows: Option<u64>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PartitionResponse {
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

/// Failure of one SQL API call, before it is attributed to a phase.
#[derive(Debug)]
enum ApiError {
    /// Token rejected or expired.
    Unauthorized(String),
    Transport(String),
    Statement(String),
}

impl ApiError {
    fn into_sync(self, as_phase: fn(Store, String) -> SyncError) -> SyncError {
        match self {
            ApiError::Unauthorized(m) => SyncError::connection(Store::Warehouse, m),
            ApiError::Transport(m) | ApiError::Statement(m) => as_phase(Store::Warehouse, m),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

fn read_error(store: Store, message: String) -> SyncError {
    SyncError::read(store, message)
}

fn write_error(store: Store, message: String) -> SyncError {
    SyncError::write(store, message)
}

/// Snowflake over the SQL REST API. Each statement is an independent HTTP request, so the
/// "connection" is the configured client plus a successful test query.
pub struct SnowflakeWarehouse {
    client: Client,
    base_url: String,
    config: WarehouseConfig,
    settings: LoadSettings,
}

impl SnowflakeWarehouse {
    pub async fn connect(config: WarehouseConfig, settings: LoadSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.statement_timeout + settings.connect_timeout)
            .user_agent(concat!("warehouse_sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::connection(Store::Warehouse, e))?;

        let warehouse = Self {
            client,
            base_url: config.base_url(),
            config,
            settings,
        };

        info!(
            account = %warehouse.config.account,
            database = %warehouse.config.database,
            schema = %warehouse.config.schema,
            "Connecting to Snowflake"
        );
        warehouse
            .execute("SELECT CURRENT_TIMESTAMP()", None)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized(m) | ApiError::Transport(m) | ApiError::Statement(m) => {
                    SyncError::connection(Store::Warehouse, m)
                }
            })?;
        Ok(warehouse)
    }

    fn statements_url(&self) -> String {
        format!("{}/api/v2/statements", self.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header("X-Snowflake-Authorization-Token-Type", self.config.auth.token_type())
            .header("Accept", "application/json")
    }

    /// Run one statement to completion and return every result row.
    async fn execute(
        &self,
        statement: &str,
        bindings: Option<serde_json::Value>,
    ) -> std::result::Result<Vec<Vec<Option<String>>>, ApiError> {
        let mut body = json!({
            "statement": statement,
            "timeout": self.settings.statement_timeout.as_secs(),
            "database": self.config.database,
            "schema": self.config.schema,
            "warehouse": self.config.warehouse,
            "parameters": session_parameters(),
        });
        if let Some(role) = &self.config.role {
            body["role"] = json!(role);
        }
        if let Some(bindings) = bindings {
            body["bindings"] = bindings;
        }

        let request_id = Uuid::new_v4();
        debug!(%request_id, statement, "submitting statement");
        let response = self
            .authorized(self.client.post(self.statements_url()))
            .query(&[("requestId", request_id.to_string())])
            .json(&body)
            .send()
            .await?;

        let mut result = self.read_response(response).await?;
        while result.result_set_meta_data.is_none() {
            let handle = result.statement_handle.clone().ok_or_else(|| {
                ApiError::Statement("statement accepted without a handle".to_string())
            })?;
            tokio::time::sleep(self.settings.poll_interval).await;
            let response = self
                .authorized(self.client.get(format!("{}/{}", self.statements_url(), handle)))
                .send()
                .await?;
            result = self.read_response(response).await?;
        }

        let mut rows = std::mem::take(&mut result.data);
        let partitions = result
            .result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len())
            .unwrap_or(0);
        if partitions > 1 {
            let handle = result.statement_handle.clone().unwrap_or_default();
            for partition in 1..partitions {
                let response = self
                    .authorized(self.client.get(format!("{}/{}", self.statements_url(), handle)))
                    .query(&[("partition", partition.to_string())])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(ApiError::Statement(format!(
                        "partition {partition} fetch returned {}",
                        response.status()
                    )));
                }
                let page: PartitionResponse = response.json().await?;
                rows.extend(page.data);
            }
        }

        if let Some(expected) = result.result_set_meta_data.and_then(|m| m.num_rows) {
            if expected as usize != rows.len() {
                warn!(expected, got = rows.len(), "row count differs from result metadata");
            }
        }
        Ok(rows)
    }

    /// 200 yields a complete result, 202 a handle to poll; anything else is an error.
    async fn read_response(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<StatementResponse, ApiError> {
        let status = response.status();
        let text = response.text().await?;
        let parsed: StatementResponse = serde_json::from_str(&text).unwrap_or_default();

        match status {
            StatusCode::OK => Ok(parsed),
            StatusCode::ACCEPTED => Ok(StatementResponse {
                result_set_meta_data: None,
                ..parsed
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized(
                parsed.message.unwrap_or_else(|| format!("HTTP {status}")),
            )),
            _ => {
                let message = parsed.message.unwrap_or(text);
                Err(ApiError::Statement(format!(
                    "HTTP {status} code={} sqlState={}: {message}",
                    parsed.code.as_deref().unwrap_or("-"),
                    parsed.sql_state.as_deref().unwrap_or("-"),
                )))
            }
        }
    }

    async fn load_stage(&self, stage: &Identifier, data: &NormalizedDataset) -> Result<(usize, usize)> {
        let types = sql::infer_column_types(data.as_dataset());
        self.execute(&sql::create_or_replace_sql(stage, data.columns(), &types), None)
            .await
            .map_err(|e| e.into_sync(write_error))?;

        let mut inserted = 0usize;
        let mut chunks = 0usize;
        for chunk in data.rows().chunks(self.settings.insert_batch_rows) {
            let result = self
                .execute(&sql::insert_sql(stage, data.columns(), chunk, &types), None)
                .await
                .map_err(|e| e.into_sync(write_error))?;
            let count = result
                .first()
                .and_then(|r| r.first())
                .and_then(|v| v.as_deref())
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(chunk.len());
            inserted += count;
            chunks += 1;
            debug!(chunk = chunks, rows = count, "staged chunk");
        }

        if inserted != data.len() {
            return Err(SyncError::write(
                Store::Warehouse,
                format!("staged {inserted} of {} rows", data.len()),
            ));
        }
        Ok((chunks, inserted))
    }

    async fn drop_stage(&self, stage: &Identifier) {
        let statement = format!("DROP TABLE IF EXISTS {}", stage.quoted_upper());
        if let Err(e) = self.execute(&statement, None).await {
            warn!(stage = %stage, "Failed to drop staging table: {:?}", e);
        }
    }
}

/// Pinned per statement so `TO_VARCHAR` of date keys matches Postgres' `date::text`.
fn session_parameters() -> serde_json::Value {
    json!({
        "QUERY_TAG": "warehouse_sync",
        "TIMEZONE": "UTC",
        "DATE_OUTPUT_FORMAT": "YYYY-MM-DD",
    })
}

/// Warehouse-side validation query; the single binding is the run date as text.
pub fn render_sql(query: &RenderQuery) -> String {
    let mut select = Vec::new();
    for key in &query.key_columns {
        select.push(format!("TO_VARCHAR({})", key.quoted_upper()));
    }
    for col in &query.timestamp_columns {
        select.push(format!(
            "TO_CHAR(CONVERT_TIMEZONE('UTC', '{}', {}), '{}')",
            LOCAL_ZONE_NAME,
            col.quoted_upper(),
            SNOWFLAKE_RENDER_PATTERN
        ));
    }
    let order: Vec<String> = query
        .key_columns
        .iter()
        .chain(&query.timestamp_columns)
        .map(|c| format!("{} NULLS LAST", c.quoted_upper()))
        .collect();

    format!(
        "SELECT {} FROM {} WHERE TO_DATE({}) = TO_DATE(?) ORDER BY {}",
        select.join(", "),
        query.table.quoted_upper(),
        query.date_column.quoted_upper(),
        order.join(", ")
    )
}

#[async_trait]
impl WarehousePort for SnowflakeWarehouse {
    async fn bulk_write(&self, table: &Identifier, data: &NormalizedDataset) -> Result<WriteOutcome> {
        let target = table.upper();
        let stage = Identifier::new(format!("{}{}", target, STAGE_SUFFIX))?;

        let (chunks, rows_written) = match self.load_stage(&stage, data).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.drop_stage(&stage).await;
                return Err(e);
            }
        };

        let swap = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} LIKE {}",
                target.quoted_upper(),
                stage.quoted_upper()
            ),
            format!(
                "ALTER TABLE {} SWAP WITH {}",
                target.quoted_upper(),
                stage.quoted_upper()
            ),
        ];
        for statement in &swap {
            if let Err(e) = self.execute(statement, None).await {
                self.drop_stage(&stage).await;
                return Err(e.into_sync(write_error));
            }
        }
        self.drop_stage(&stage).await;

        info!(table = %target, rows = rows_written, chunks, "Overwrote warehouse table");
        Ok(WriteOutcome {
            success: true,
            chunks,
            rows_written,
        })
    }

    async fn fetch_rendered(&self, query: &RenderQuery) -> Result<Vec<RenderedRow>> {
        let statement = render_sql(query);
        let bindings = json!({
            "1": { "type": "TEXT", "value": query.run_date.format("%Y-%m-%d").to_string() }
        });
        let rows = self
            .execute(&statement, Some(bindings))
            .await
            .map_err(|e| e.into_sync(read_error))?;

        let keys = query.key_columns.len();
        let width = keys + query.timestamp_columns.len();
        rows.into_iter()
            .map(|mut row| {
                if row.len() != width {
                    return Err(SyncError::read(
                        Store::Warehouse,
                        format!("expected {width} columns, got {}", row.len()),
                    ));
                }
                let stamps = row.split_off(keys);
                Ok(RenderedRow::new(row, stamps))
            })
            .collect()
    }
}
