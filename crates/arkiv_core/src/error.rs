use thiserror::Error;

/// MySQL vendor code raised when a delete breaks a foreign key constraint.
pub const ER_ROW_IS_REFERENCED: u16 = 1451;

/// MySQL client code for a refused/unreachable server.
pub const CR_CONN_HOST_ERROR: u16 = 2003;

/// Errors surfaced by the database gateway.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish a connection to the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected a statement with a vendor error code.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// Driver-level failure without a vendor code.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Network or socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Foreign key violation on delete (vendor 1451). Never retried.
    pub fn is_fk_violation(&self) -> bool {
        matches!(self, Self::Server { code, .. } if *code == ER_ROW_IS_REFERENCED)
    }

    /// Server unreachable; the connection must be re-established.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Server { code, .. } => *code == CR_CONN_HOST_ERROR,
            Self::Io(err) => err.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Raw server message, used to parse integrity violations.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Server { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Errors of the archiving pipeline.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Db(#[from] DbError),

    /// Source and destination `SHOW CREATE DATABASE` differ. Fatal: silent
    /// schema drift must not be tolerated.
    #[error("create database statements differ between source and archive for `{database}`")]
    NotEqualDbCreateStatements { database: String },

    /// Source and destination `SHOW CREATE TABLE` differ (ignoring
    /// AUTO_INCREMENT). Fatal for the affected archiver.
    #[error("create table statements differ between source and archive for `{table}`")]
    NotEqualTableCreateStatements { table: String },

    /// A destination failed to write a batch; the coordinator skips the
    /// deletion step for that batch.
    #[error("archiving of data set failed")]
    ArchivingFailed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file destination error: {0}")]
    FileWrite(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interrupted")]
    Interrupted,
}
