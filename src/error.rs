use thiserror::Error;

/// Which side of the transfer an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Source,
    Warehouse,
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Store::Source => write!(f, "source"),
            Store::Warehouse => write!(f, "warehouse"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{store} connection failed: {message}")]
    Connection { store: Store, message: String },

    #[error("{store} read failed: {message}")]
    Read { store: Store, message: String },

    #[error("{store} write failed: {message}")]
    Write { store: Store, message: String },

    #[error("invalid timestamp in column {column} at row {row}: {value:?} ({reason})")]
    Timestamp {
        column: String,
        row: usize,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl SyncError {
    pub fn connection(store: Store, message: impl std::fmt::Display) -> Self {
        SyncError::Connection {
            store,
            message: message.to_string(),
        }
    }

    pub fn read(store: Store, message: impl std::fmt::Display) -> Self {
        SyncError::Read {
            store,
            message: message.to_string(),
        }
    }

    pub fn write(store: Store, message: impl std::fmt::Display) -> Self {
        SyncError::Write {
            store,
            message: message.to_string(),
        }
    }

    /// A join key whose text form would differ between the two stores.
    pub fn unsupported_key(column: impl std::fmt::Display, type_name: impl std::fmt::Display) -> Self {
        SyncError::Config(format!(
            "key column {column} has type {type_name}; keyed validation needs text, integer, boolean or date keys"
        ))
    }

    /// Short label used for metrics and the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Connection { .. } => "connection",
            SyncError::Read { .. } => "read",
            SyncError::Write { .. } => "write",
            SyncError::Timestamp { .. } => "timestamp",
            SyncError::Config(_) => "config",
            SyncError::InvalidIdentifier(_) => "identifier",
        }
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(e: tokio_postgres::Error) -> Self {
        SyncError::read(Store::Source, e)
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Config(format!("TOML deserialization failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_store() {
        let err = SyncError::connection(Store::Warehouse, "auth rejected");
        assert_eq!(err.to_string(), "warehouse connection failed: auth rejected");
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn timestamp_error_carries_location() {
        let err = SyncError::Timestamp {
            column: "I_TS".into(),
            row: 3,
            value: "not-a-date".into(),
            reason: "unrecognized format".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("I_TS"));
        assert!(msg.contains("row 3"));
        assert!(msg.contains("not-a-date"));
    }
}
