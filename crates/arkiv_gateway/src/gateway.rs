use std::collections::HashMap;
use std::time::{Duration, Instant};

use arkiv_core::{DbError, FkEdge, Row, TableMeta, TableRef};
use log::{debug, error, info};
use mysql::prelude::*;
use mysql::{Conn, Opts, OptsBuilder};

use crate::convert::{params_from_values, row_from_mysql};
use crate::dialect::{escape_string, quote_ident};

/// Pause before reconnecting after the server refused the connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(20);

/// Connection parameters and retry limits of one gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub max_retries: u32,
    /// Seconds to sleep between two retries.
    pub retry_time_limit: u64,
    pub dry_run: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            max_retries: 5,
            retry_time_limit: 2,
            dry_run: false,
        }
    }
}

/// One statement to run through the gateway.
#[derive(Debug, Clone, Default)]
pub struct DbRequest {
    pub sql: String,
    /// Per-row positional parameters; non-empty switches to batch execution.
    pub values: Vec<Vec<arkiv_core::Value>>,
    pub fetch: bool,
    pub database: Option<String>,
    pub table: Option<String>,
    pub fk_check: Option<bool>,
}

impl DbRequest {
    pub fn fetch(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            fetch: true,
            ..Self::default()
        }
    }

    pub fn execute(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn fk_check(mut self, enabled: bool) -> Self {
        self.fk_check = Some(enabled);
        self
    }

    pub fn values(mut self, values: Vec<Vec<arkiv_core::Value>>) -> Self {
        self.values = values;
        self
    }
}

/// Result of a gateway request.
#[derive(Debug)]
pub enum DbOutcome {
    Rows(Vec<Row>),
    Affected(u64),
}

impl DbOutcome {
    pub fn rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => Vec::new(),
        }
    }

    pub fn affected(self) -> u64 {
        match self {
            Self::Affected(count) => count,
            Self::Rows(rows) => rows.len() as u64,
        }
    }
}

/// Synchronous MySQL gateway shared by the source engine and the database
/// destination.
///
/// The connection opens lazily on first use and is kept for the run;
/// `SET FOREIGN_KEY_CHECKS` and `USE` are only issued when the cached session
/// state differs from what a request asks for. In dry-run mode every commit
/// becomes a rollback and foreign key checks are forced off.
pub struct Gateway {
    config: GatewayConfig,
    conn: Option<Conn>,
    current_database: Option<String>,
    fk_checks_enabled: Option<bool>,
    meta: HashMap<TableRef, TableMeta>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            conn: None,
            current_database: None,
            fk_checks_enabled: None,
            meta: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Close the connection if one is open. The next request reconnects.
    pub fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(
                "closing connection to {}:{}",
                self.config.host, self.config.port
            );
        }
        self.current_database = None;
        self.fk_checks_enabled = None;
    }

    /// Run one request with the gateway's retry policy.
    ///
    /// Foreign key violations (vendor 1451) are raised immediately so the
    /// caller can bisect; connection-refused closes the connection and backs
    /// off longer before the next attempt.
    pub fn request(&mut self, req: DbRequest) -> Result<DbOutcome, DbError> {
        let mut fk_check = req.fk_check;
        if self.config.dry_run && fk_check != Some(false) {
            debug!("forcing foreign key checks off in dry-run mode");
            fk_check = Some(false);
        }

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&req, fk_check) {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    error!("SQL error: {err}");
                    if err.is_fk_violation() {
                        debug!("foreign key constraint error, no retry attempted");
                        return Err(err);
                    }

                    if err.is_connection_refused() {
                        self.disconnect();
                        error!(
                            "connection refused, sleeping {} seconds before reconnecting",
                            RECONNECT_DELAY.as_secs()
                        );
                        std::thread::sleep(RECONNECT_DELAY);
                    } else if matches!(err, DbError::Io(_)) {
                        // stale socket, drop it so the next attempt reconnects
                        self.disconnect();
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(err);
                    }
                    info!("Retry {attempt}/{}", self.config.max_retries);
                    std::thread::sleep(Duration::from_secs(self.config.retry_time_limit));
                }
            }
        }
    }

    fn attempt(&mut self, req: &DbRequest, fk_check: Option<bool>) -> Result<DbOutcome, DbError> {
        self.ensure_connected()?;

        // Rebind the session database only when it changed
        if let Some(db) = req.database.as_deref()
            && self.current_database.as_deref() != Some(db)
        {
            debug!("switching to database {db}");
            self.conn_mut()?
                .query_drop(format!("USE {}", quote_ident(db)))
                .map_err(map_mysql_error)?;
            self.current_database = Some(db.to_string());
        }

        // Apply the foreign key toggle only when the cached value differs
        if let Some(enabled) = fk_check
            && self.fk_checks_enabled != Some(enabled)
        {
            debug!(
                "{} foreign_key_check",
                if enabled { "enabling" } else { "disabling" }
            );
            self.conn_mut()?
                .query_drop(if enabled {
                    "SET FOREIGN_KEY_CHECKS=1"
                } else {
                    "SET FOREIGN_KEY_CHECKS=0"
                })
                .map_err(map_mysql_error)?;
            self.fk_checks_enabled = Some(enabled);
        }

        debug!("executing SQL command: '{}'", sql_preview(&req.sql));
        let start = Instant::now();

        let conn = self.conn_mut()?;
        if req.fetch {
            let rows: Vec<mysql::Row> = conn.query(&req.sql).map_err(map_mysql_error)?;
            debug!(
                "SQL duration: {:.3} sec, {} rows fetched",
                start.elapsed().as_secs_f64(),
                rows.len()
            );
            return Ok(DbOutcome::Rows(rows.iter().map(row_from_mysql).collect()));
        }

        let affected = if req.values.is_empty() {
            conn.query_drop(&req.sql).map_err(map_mysql_error)?;
            conn.affected_rows()
        } else {
            let stmt = conn.prep(&req.sql).map_err(map_mysql_error)?;
            conn.exec_batch(&stmt, req.values.iter().map(|row| params_from_values(row)))
                .map_err(map_mysql_error)?;
            req.values.len() as u64
        };
        debug!("SQL duration: {:.3} sec", start.elapsed().as_secs_f64());

        if self.config.dry_run {
            info!("[DRY RUN] rolling back instead of committing: '{}'", sql_preview(&req.sql));
            self.conn_mut()?
                .query_drop("ROLLBACK")
                .map_err(map_mysql_error)?;
            return Ok(DbOutcome::Affected(req.values.len() as u64));
        }

        self.conn_mut()?
            .query_drop("COMMIT")
            .map_err(map_mysql_error)?;
        Ok(DbOutcome::Affected(affected))
    }

    fn ensure_connected(&mut self) -> Result<(), DbError> {
        if self.conn.is_some() {
            return Ok(());
        }

        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.config.host.as_str()))
            .tcp_port(self.config.port)
            .user(Some(self.config.user.as_str()))
            .pass(Some(self.config.password.as_str()))
            .into();

        let mut conn = Conn::new(opts).map_err(|e| match e {
            mysql::Error::IoError(io) => DbError::Io(io),
            other => DbError::ConnectionFailed(other.to_string()),
        })?;

        // Commit/rollback must stay an explicit decision (dry-run rolls back)
        conn.query_drop("SET autocommit=0").map_err(map_mysql_error)?;

        debug!(
            "connected to mysql://{}:***@{}:{}",
            self.config.user, self.config.host, self.config.port
        );
        self.conn = Some(conn);
        self.current_database = None;
        self.fk_checks_enabled = None;
        Ok(())
    }

    fn conn_mut(&mut self) -> Result<&mut Conn, DbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::ConnectionFailed("connection is not open".to_string()))
    }

    // -------------------------------------------------------------------
    // Schema helpers
    // -------------------------------------------------------------------

    pub fn list_databases(&mut self) -> Result<Vec<String>, DbError> {
        let rows = self.request(DbRequest::fetch("SHOW DATABASES"))?.rows();
        Ok(rows.iter().filter_map(first_column_string).collect())
    }

    pub fn list_tables(&mut self, database: &str) -> Result<Vec<String>, DbError> {
        let rows = self
            .request(DbRequest::fetch("SHOW TABLES").database(database))?
            .rows();
        Ok(rows.iter().filter_map(first_column_string).collect())
    }

    pub fn has_column(
        &mut self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<bool, DbError> {
        let sql = format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema='{}' AND table_name='{}' AND column_name='{}'",
            escape_string(database),
            escape_string(table),
            escape_string(column)
        );
        let rows = self
            .request(DbRequest::fetch(sql).database(database).table(table))?
            .rows();
        Ok(!rows.is_empty())
    }

    /// First primary key column of a table, memoized for the run.
    pub fn primary_key(&mut self, database: &str, table: &str) -> Result<String, DbError> {
        let table_ref = TableRef::new(database, table);
        if let Some(pk) = self
            .meta
            .get(&table_ref)
            .and_then(|meta| meta.primary_key.clone())
        {
            return Ok(pk);
        }

        let sql = format!(
            "SHOW KEYS FROM {} WHERE Key_name='PRIMARY'",
            crate::dialect::qualified_name(database, table)
        );
        let rows = self.request(DbRequest::fetch(sql))?.rows();
        let pk = rows
            .first()
            .and_then(|row| row.get("Column_name"))
            .map(|value| value.as_plain_string())
            .ok_or_else(|| DbError::QueryFailed(format!("no primary key on {table_ref}")))?;

        debug!("primary key of {table_ref} is {pk}");
        self.meta.entry(table_ref).or_default().primary_key = Some(pk.clone());
        Ok(pk)
    }

    /// Foreign key edges whose parent is the given table.
    pub fn children_with_fk(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<Vec<FkEdge>, DbError> {
        let sql = format!(
            "SELECT table_schema, table_name, column_name, \
             referenced_table_schema, referenced_table_name, referenced_column_name \
             FROM information_schema.key_column_usage \
             WHERE referenced_table_name IS NOT NULL \
             AND referenced_table_schema='{}' AND referenced_table_name='{}'",
            escape_string(database),
            escape_string(table)
        );
        let edges = self.fetch_fk_edges(&sql)?;
        if edges.is_empty() {
            debug!("table {database}.{table} has no child tables with foreign key");
        } else {
            debug!(
                "table {database}.{table} has child tables with foreign key: {:?}",
                edges
                    .iter()
                    .map(|e| format!("{}.{}", e.child_database, e.child_table))
                    .collect::<Vec<_>>()
            );
        }
        Ok(edges)
    }

    /// Foreign key edges whose child is the given table.
    pub fn foreign_keys_of(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<Vec<FkEdge>, DbError> {
        let sql = format!(
            "SELECT table_schema, table_name, column_name, \
             referenced_table_schema, referenced_table_name, referenced_column_name \
             FROM information_schema.key_column_usage \
             WHERE referenced_table_name IS NOT NULL \
             AND table_schema='{}' AND table_name='{}'",
            escape_string(database),
            escape_string(table)
        );
        self.fetch_fk_edges(&sql)
    }

    fn fetch_fk_edges(&mut self, sql: &str) -> Result<Vec<FkEdge>, DbError> {
        let rows = self.request(DbRequest::fetch(sql))?.rows();
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(FkEdge {
                    child_database: plain(row, "TABLE_SCHEMA")?,
                    child_table: plain(row, "TABLE_NAME")?,
                    child_column: plain(row, "COLUMN_NAME")?,
                    parent_database: plain(row, "REFERENCED_TABLE_SCHEMA")?,
                    parent_table: plain(row, "REFERENCED_TABLE_NAME")?,
                    parent_column: plain(row, "REFERENCED_COLUMN_NAME")?,
                })
            })
            .collect())
    }

    // -------------------------------------------------------------------
    // Per-table metadata
    // -------------------------------------------------------------------

    pub fn pk_is_digit(&self, table_ref: &TableRef) -> Option<bool> {
        self.meta.get(table_ref).and_then(|meta| meta.pk_is_digit)
    }

    pub fn set_pk_is_digit(&mut self, table_ref: TableRef, is_digit: bool) {
        debug!("caching pk_is_digit={is_digit} for {table_ref}");
        self.meta.entry(table_ref).or_default().pk_is_digit = Some(is_digit);
    }

    pub fn prerequisites_checked(&self, table_ref: &TableRef) -> bool {
        self.meta
            .get(table_ref)
            .map(|meta| meta.prerequisites_checked)
            .unwrap_or(false)
    }

    pub fn set_prerequisites_checked(&mut self, table_ref: TableRef) {
        self.meta.entry(table_ref).or_default().prerequisites_checked = true;
    }
}

fn map_mysql_error(e: mysql::Error) -> DbError {
    match e {
        mysql::Error::MySqlError(server) => DbError::Server {
            code: server.code,
            message: server.message,
        },
        mysql::Error::IoError(io) => DbError::Io(io),
        other => DbError::QueryFailed(other.to_string()),
    }
}

fn first_column_string(row: &Row) -> Option<String> {
    row.values().next().map(|value| value.as_plain_string())
}

fn plain(row: &Row, column: &str) -> Option<String> {
    // information_schema column headers differ in case across server versions
    row.get(column)
        .or_else(|| row.get(column.to_lowercase().as_str()))
        .map(|value| value.as_plain_string())
}

fn sql_preview(sql: &str) -> String {
    let flat = sql.replace('\n', " ");
    let truncated: String = flat.chars().take(120).collect();
    if truncated.len() < flat.len() {
        format!("{truncated}...")
    } else {
        flat
    }
}
