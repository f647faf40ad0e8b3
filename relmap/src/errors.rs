use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityKind {
    Unique,
    ForeignKey,
    Check,
    NotNull,
    Exclusion,
    Other(String),
}

/// Failures surfaced by a driver. They are passed through unmodified by the
/// query builder and the preloader.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("integrity violation ({kind:?})")]
    Integrity {
        kind: IntegrityKind,
        constraint: Option<String>,
        #[source]
        source: Option<sqlx::Error>,
    },
    #[error("query returned multiple rows")]
    MultipleObjects,
    #[error("record not found")]
    DoesNotExist,
    #[error("temporary database failure")]
    Temporary,
    #[error("bind error: {0}")]
    Bind(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("unhandled db error: {0}")]
    Fatal(sqlx::Error),
}

impl DbError {
    pub const fn code(&self) -> &'static str {
        match self {
            DbError::Integrity { .. } => "integrity_violation",
            DbError::MultipleObjects => "multiple_objects",
            DbError::DoesNotExist => "not_found",
            DbError::Temporary => "temporary_error",
            DbError::Bind(_) => "bind_error",
            DbError::Decode(_) => "decode_error",
            DbError::Driver(_) => "driver_error",
            DbError::Fatal(_) => "fatal_error",
        }
    }
}

/// Integrity kind for SQLSTATE class `23`, `None` for any other code.
fn integrity_kind(code: &str) -> Option<IntegrityKind> {
    if !code.starts_with("23") {
        return None;
    }
    Some(match code {
        "23505" => IntegrityKind::Unique,
        "23503" => IntegrityKind::ForeignKey,
        "23514" => IntegrityKind::Check,
        "23502" => IntegrityKind::NotNull,
        "23P01" => IntegrityKind::Exclusion,
        other => IntegrityKind::Other(other.to_string()),
    })
}

/// Connection exceptions, serialization failures, deadlocks and admin
/// shutdowns succeed when tried again.
fn is_transient(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01")
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => DbError::DoesNotExist,
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                if let Some(kind) = integrity_kind(&code) {
                    let constraint = db.constraint().map(|s| s.to_owned());
                    return DbError::Integrity {
                        kind,
                        constraint,
                        source: Some(e),
                    };
                }
                if is_transient(&code) {
                    return DbError::Temporary;
                }
                DbError::Driver(format!("{} (SQLSTATE {})", db.message(), code))
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                DbError::Temporary
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Decode(e.to_string())
            }
            _ => DbError::Fatal(e),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection alias '{0}' not found")]
    AliasNotFound(String),
    #[error("no connection available to retry on")]
    NoConnections,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Unresolvable association path, missing primary key or table name,
    /// malformed descriptor. Raised before any SQL is issued.
    #[error("improperly configured: {0}")]
    Configuration(String),

    #[error("{table} has no primary key value, cannot be written")]
    ZeroKey { table: &'static str },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl Error {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "improperly_configured",
            Error::ZeroKey { .. } => "zero_primary_key",
            Error::Connection(ConnectionError::AliasNotFound(_)) => "alias_not_found",
            Error::Connection(ConnectionError::NoConnections) => "no_connections",
            Error::Database(e) => e.code(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Database(DbError::DoesNotExist))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(DbError::from(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
