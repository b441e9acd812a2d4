pub mod in_memory;
pub mod postgres_source;
pub mod snowflake_warehouse;
pub mod sql;
