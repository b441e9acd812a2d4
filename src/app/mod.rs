pub mod ports;
pub mod ingest_use_case;
pub mod validate_use_case;
