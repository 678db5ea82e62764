use std::collections::HashMap;
use std::time::Duration;

use arkiv_core::{ArchiveError, Batch, DbError, Destination, TableRef, Value};
use arkiv_gateway::{DbRequest, Gateway, escape_string, quote_ident};
use log::{debug, info, warn};

use crate::schema::{compare_create_table, rename_database_create, rewrite_statement_name};

/// Pause given to the operator when source and destination cannot be told
/// apart (same host, different port, no suffixes).
const SAME_HOST_WARNING_PAUSE: Duration = Duration::from_secs(10);

/// Configuration of one database destination section.
#[derive(Debug, Clone, Default)]
pub struct DbDestConfig {
    pub name: String,
    /// Appended to the source database name; may contain `{date}`.
    pub db_suffix: String,
    /// Appended to the source table name; may contain `{date}`.
    pub table_suffix: String,
    pub archive_data: bool,
    /// Rows buffered before an insert is flushed.
    pub bulk_insert: u64,
}

/// Archive destination writing into a mirror MySQL server.
///
/// Owns two gateways: one to the archive server and one back to the source,
/// used for `SHOW CREATE` statements and primary keys so the archive schema
/// is reconciled against what the rows actually came from.
pub struct DbDestination {
    config: DbDestConfig,
    dst: Gateway,
    src: Gateway,
    db_suffix: String,
    table_suffix: Option<String>,
    normalized_db_suffixes: HashMap<String, String>,
    archive_db_names: HashMap<String, String>,
    run_stamp: String,
}

impl DbDestination {
    pub fn new(config: DbDestConfig, src: Gateway, dst: Gateway) -> Self {
        let run_stamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S").to_string();
        let db_suffix = config.db_suffix.clone();
        Self {
            config,
            dst,
            src,
            db_suffix,
            table_suffix: None,
            normalized_db_suffixes: HashMap::new(),
            archive_db_names: HashMap::new(),
            run_stamp,
        }
    }

    /// Archive database name for a source database, stable for the run.
    pub fn archive_db_name(&mut self, database: &str) -> String {
        if let Some(name) = self.archive_db_names.get(database) {
            return name.clone();
        }
        let name = format!("{database}{}", self.normalize_db_suffix(database));
        self.archive_db_names
            .insert(database.to_string(), name.clone());
        name
    }

    fn normalize_db_suffix(&mut self, database: &str) -> String {
        if let Some(suffix) = self.normalized_db_suffixes.get(database) {
            debug!("using cached db suffix '{suffix}' of '{database}' database");
            return suffix.clone();
        }

        let same_host = self.src.config().host == self.dst.config().host;
        let same_port = self.src.config().port == self.dst.config().port;
        let no_suffixes = self.db_suffix.is_empty() && self.config.table_suffix.is_empty();

        // Archiving into the very same database would overwrite the source
        if same_host && same_port && no_suffixes {
            self.db_suffix = "_archive".to_string();
            warn!(
                "destination host is the source host, forcing the archive database suffix to \
                 '{}' to prevent writing on the database being archived",
                self.db_suffix
            );
        }

        if same_host && !same_port && no_suffixes {
            warn!(
                "cannot verify that the destination database differs from the source database, \
                 you may lose data, BE CAREFUL"
            );
            warn!("sleeping {} sec...", SAME_HOST_WARNING_PAUSE.as_secs());
            std::thread::sleep(SAME_HOST_WARNING_PAUSE);
        }

        self.db_suffix = self.db_suffix.replace("{date}", &self.run_stamp);
        let suffix = self.db_suffix.clone();
        debug!("caching db suffix '{suffix}' of '{database}' database");
        self.normalized_db_suffixes
            .insert(database.to_string(), suffix.clone());
        suffix
    }

    fn normalize_table_suffix(&mut self) -> String {
        if let Some(suffix) = &self.table_suffix {
            return suffix.clone();
        }
        let suffix = self.config.table_suffix.replace("{date}", &self.run_stamp);
        self.table_suffix = Some(suffix.clone());
        suffix
    }

    /// Second column of a `SHOW CREATE …` row, the statement text itself.
    fn create_statement(rows: Vec<arkiv_core::Row>, what: &str) -> Result<String, ArchiveError> {
        rows.first()
            .and_then(|row| row.values().nth(1))
            .map(|value| value.as_plain_string())
            .ok_or_else(|| {
                DbError::QueryFailed(format!("empty SHOW CREATE result for {what}")).into()
            })
    }

    fn create_archive_db(&mut self, database: &str) -> Result<(), ArchiveError> {
        let archive_db = self.archive_db_name(database);

        let exists = !self
            .dst
            .request(DbRequest::fetch(format!(
                "SHOW DATABASES LIKE '{}'",
                escape_string(&archive_db)
            )))?
            .rows()
            .is_empty();

        let src_statement = Self::create_statement(
            self.src
                .request(DbRequest::fetch(format!(
                    "SHOW CREATE DATABASE {}",
                    quote_ident(database)
                )))?
                .rows(),
            database,
        )?;
        debug!("source database '{database}' CREATE statement: '{src_statement}'");

        if exists {
            debug!("destination already has the '{archive_db}' database");
            let dst_statement = Self::create_statement(
                self.dst
                    .request(DbRequest::fetch(format!(
                        "SHOW CREATE DATABASE {}",
                        quote_ident(&archive_db)
                    )))?
                    .rows(),
                &archive_db,
            )?;

            let compared =
                rewrite_statement_name(&dst_statement, "DATABASE", &archive_db, database);
            if compared == src_statement {
                info!("source and destination database are identical");
                return Ok(());
            }
            debug!("source:      '{src_statement}'");
            debug!("destination: '{compared}'");
            return Err(ArchiveError::NotEqualDbCreateStatements {
                database: database.to_string(),
            });
        }

        debug!("'{archive_db}' does not exist on the destination");
        let sql = rename_database_create(&src_statement, database, &archive_db);
        self.dst.request(DbRequest::execute(sql))?;
        if !self.dst.dry_run() {
            debug!("successfully created '{archive_db}'");
        }
        Ok(())
    }

    fn create_archive_table(&mut self, database: &str, table: &str) -> Result<(), ArchiveError> {
        let archive_db = self.archive_db_name(database);
        let archive_table = format!("{table}{}", self.normalize_table_suffix());

        let exists = !self
            .dst
            .request(
                DbRequest::fetch(format!(
                    "SHOW TABLES LIKE '{}'",
                    escape_string(&archive_table)
                ))
                .database(&archive_db),
            )?
            .rows()
            .is_empty();

        let src_statement = Self::create_statement(
            self.src
                .request(
                    DbRequest::fetch(format!("SHOW CREATE TABLE {}", quote_ident(table)))
                        .database(database),
                )?
                .rows(),
            table,
        )?;
        debug!("source table '{table}' CREATE statement: '{src_statement}'");

        if exists {
            debug!("destination already has the '{archive_db}.{archive_table}' table");
            let dst_statement = Self::create_statement(
                self.dst
                    .request(
                        DbRequest::fetch(format!(
                            "SHOW CREATE TABLE {}",
                            quote_ident(&archive_table)
                        ))
                        .database(&archive_db),
                    )?
                    .rows(),
                &archive_table,
            )?;
            return compare_create_table(&src_statement, &dst_statement, table, &archive_table);
        }

        debug!("'{archive_table}' table does not exist on the destination");
        // The archive mirror does not have to enforce referential integrity
        let sql = rewrite_statement_name(&src_statement, "TABLE", table, &archive_table);
        self.dst
            .request(DbRequest::execute(sql).database(&archive_db).fk_check(false))?;
        if !self.dst.dry_run() {
            debug!("successfully created '{archive_db}.{archive_table}'");
        }
        Ok(())
    }

    /// Create-or-verify archive database and table, once per (db, table).
    fn prerequisites(&mut self, database: &str, table: &str) -> Result<(), ArchiveError> {
        let table_ref = TableRef::new(database, table);
        if self.dst.prerequisites_checked(&table_ref) {
            debug!("using cached prerequisites for {table_ref}");
            return Ok(());
        }

        info!("checking prerequisites for {table_ref}");
        self.create_archive_db(database)?;
        self.create_archive_table(database, table)?;
        self.src.primary_key(database, table)?;
        self.dst.set_prerequisites_checked(table_ref);
        Ok(())
    }

    fn flush(
        &mut self,
        sql: &str,
        archive_db: &str,
        table: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<(), ArchiveError> {
        info!("processing bulk insert of {} rows", values.len());
        let count = self
            .dst
            .request(
                DbRequest::execute(sql)
                    .database(archive_db)
                    .table(table)
                    .fk_check(false)
                    .values(values),
            )?
            .affected();
        info!("{count} rows inserted into {archive_db}.{table}");
        Ok(())
    }
}

impl Destination for DbDestination {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
        if !self.config.archive_data {
            info!("ignoring data archiving because archive_data is disabled");
            return Ok(());
        }
        if batch.is_empty() {
            return Ok(());
        }

        self.prerequisites(&batch.database, &batch.table)?;
        let primary_key = self.src.primary_key(&batch.database, &batch.table)?;
        let archive_db = self.archive_db_name(&batch.database);
        let sql = build_upsert_statement(&archive_db, &batch.table, &batch.columns(), &primary_key);

        let bulk_insert = self.config.bulk_insert.max(1) as usize;
        let mut buffer: Vec<Vec<Value>> = Vec::new();
        for row in &batch.rows {
            buffer.push(row.values().cloned().collect());
            if buffer.len() >= bulk_insert {
                let values = std::mem::take(&mut buffer);
                self.flush(&sql, &archive_db, &batch.table, values)?;
            }
        }
        // Remainder is committed with the batch so deletion never outruns it
        if !buffer.is_empty() {
            self.flush(&sql, &archive_db, &batch.table, buffer)?;
        }
        Ok(())
    }

    fn clean_exit(&mut self) -> Result<(), ArchiveError> {
        info!("closing destination DB connections");
        self.src.disconnect();
        self.dst.disconnect();
        Ok(())
    }
}

/// Idempotent insert: the no-op update on primary key collision makes
/// retries and reruns safe.
fn build_upsert_statement(
    archive_db: &str,
    table: &str,
    columns: &[&str],
    primary_key: &str,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {}.{} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {} = {}",
        quote_ident(archive_db),
        quote_ident(table),
        column_list,
        placeholders,
        quote_ident(primary_key),
        quote_ident(primary_key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkiv_gateway::GatewayConfig;

    fn gateway(host: &str, port: u16) -> Gateway {
        Gateway::new(GatewayConfig {
            host: host.to_string(),
            port,
            ..GatewayConfig::default()
        })
    }

    fn destination(config: DbDestConfig, src: Gateway, dst: Gateway) -> DbDestination {
        DbDestination::new(config, src, dst)
    }

    #[test]
    fn upsert_statement_is_idempotent_on_primary_key() {
        let sql = build_upsert_statement("nova_archive", "instances", &["id", "uuid"], "id");
        assert_eq!(
            sql,
            "INSERT INTO `nova_archive`.`instances` (`id`, `uuid`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `id` = `id`"
        );
    }

    #[test]
    fn same_host_and_port_forces_the_archive_suffix() {
        let mut dest = destination(
            DbDestConfig::default(),
            gateway("db1.local", 3306),
            gateway("db1.local", 3306),
        );
        assert_eq!(dest.archive_db_name("nova"), "nova_archive");
    }

    #[test]
    fn distinct_hosts_keep_the_configured_suffix() {
        let mut dest = destination(
            DbDestConfig {
                db_suffix: "_cold".to_string(),
                ..DbDestConfig::default()
            },
            gateway("db1.local", 3306),
            gateway("db2.local", 3306),
        );
        assert_eq!(dest.archive_db_name("nova"), "nova_cold");
    }

    #[test]
    fn same_host_with_table_suffix_does_not_force_a_db_suffix() {
        let mut dest = destination(
            DbDestConfig {
                table_suffix: "_archived".to_string(),
                ..DbDestConfig::default()
            },
            gateway("db1.local", 3306),
            gateway("db1.local", 3306),
        );
        assert_eq!(dest.archive_db_name("nova"), "nova");
    }

    #[test]
    fn date_token_is_rendered_once_and_memoized() {
        let mut dest = destination(
            DbDestConfig {
                db_suffix: "_archive_{date}".to_string(),
                ..DbDestConfig::default()
            },
            gateway("db1.local", 3306),
            gateway("db2.local", 3306),
        );
        let first = dest.archive_db_name("nova");
        assert!(!first.contains("{date}"));
        assert!(first.starts_with("nova_archive_"));
        assert_eq!(dest.archive_db_name("nova"), first);

        // the rendered suffix is reused for every database of the run
        let other = dest.archive_db_name("glance");
        assert_eq!(
            other.strip_prefix("glance").unwrap(),
            first.strip_prefix("nova").unwrap()
        );
    }
}
