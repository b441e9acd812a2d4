//! Defaults for the single table this job moves.

/// FII/DII equity flow table in the source store.
pub const DEFAULT_TABLE: &str = "t_nse_fii_dii_eq_data";

/// Insert and update time columns, as they are named after upper-casing.
pub const INSERT_TS_COLUMN: &str = "I_TS";
pub const UPDATE_TS_COLUMN: &str = "U_TS";

/// Column carrying the business date used as the validation predicate.
pub const DEFAULT_DATE_COLUMN: &str = "RUN_DT";

/// IANA name of the zone naive source timestamps are recorded in.
pub const LOCAL_ZONE_NAME: &str = "Asia/Kolkata";

/// Rendering shared by both stores' validation queries and `timezone::render_local`.
/// Example: `24-Nov-2025 10:00:00.123 AM`.
pub const RENDER_FORMAT: &str = "%d-%b-%Y %I:%M:%S%.3f %p";
pub const POSTGRES_RENDER_PATTERN: &str = "DD-Mon-YYYY HH12:MI:SS.MS AM TZ";
pub const SNOWFLAKE_RENDER_PATTERN: &str = "DD-Mon-YYYY HH12:MI:SS.FF3 AM";

/// Suffix of the staging table used for the overwrite swap.
pub const STAGE_SUFFIX: &str = "__STAGE";

pub const DEFAULT_CONFIG_FILE: &str = "warehouse_sync.toml";

pub fn default_timestamp_columns() -> Vec<String> {
    vec![INSERT_TS_COLUMN.to_string(), UPDATE_TS_COLUMN.to_string()]
}
