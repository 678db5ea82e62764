use std::collections::{HashMap, HashSet};
use std::time::Duration;

use arkiv_core::{ArchiveError, Batch, Row, Source, TableRef};
use arkiv_gateway::{DbRequest, Gateway, escape_string, fix_hint, qualified_name, select_hint};
use log::{debug, error, info};

use crate::ordering::{circular_tables, order_by_foreign_keys};
use crate::selection::{DEFAULT_WHERE, SYSTEM_DATABASES, exclusion_regex, split_list};

/// Configuration of one database source, as read from its config section.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    /// Databases to archive; `None` or `*` enumerates all of them.
    pub databases: Option<String>,
    /// Tables to archive; `None` or `*` takes every table of each database.
    pub tables: Option<String>,
    pub excluded_databases: String,
    pub excluded_tables: String,
    /// Column whose non-null value marks a row as soft-deleted.
    pub deleted_column: String,
    /// Extra WHERE condition; `{now}` is substituted once per run.
    pub where_clause: String,
    pub archive_data: bool,
    pub delete_data: bool,
    pub select_limit: u64,
    pub delete_limit: u64,
    /// Seconds to sleep between delete iterations and after each chunk.
    pub delete_loop_delay: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            databases: None,
            tables: None,
            excluded_databases: String::new(),
            excluded_tables: String::new(),
            deleted_column: "deleted_at".to_string(),
            where_clause: DEFAULT_WHERE.to_string(),
            archive_data: false,
            delete_data: false,
            select_limit: 1000,
            delete_limit: 500,
            delete_loop_delay: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct PlannedTable {
    database: String,
    table: String,
    /// Tables pulled in only as FK parents may lack the deleted column;
    /// they stay in the plan for ordering but are never streamed.
    has_deleted_column: bool,
}

#[derive(Debug)]
enum PkStyle {
    /// First page: quoted cursor, no ORDER BY, kind not probed yet.
    Unknown,
    /// Numeric key: unquoted cursor, natural index order.
    Digit,
    /// String key (UUID): quoted cursor plus ORDER BY for a stable walk.
    Quoted,
}

#[derive(Debug)]
struct PageState {
    primary_key: String,
    last_id: String,
    style: PkStyle,
}

/// Streaming source over one MySQL server.
///
/// Produces batches database by database, table by table in FK-safe order,
/// each table paginated by primary key. The stream is lazy, finite and
/// non-restartable.
pub struct DbSource {
    config: SourceConfig,
    gateway: Gateway,
    /// WHERE condition with `{now}` already substituted.
    where_clause: String,
    excluded_databases: Vec<String>,
    excluded_tables: Vec<String>,
    plan: Option<Vec<PlannedTable>>,
    position: usize,
    page: Option<PageState>,
    tables_with_circular_fk: HashSet<String>,
}

impl DbSource {
    pub fn new(config: SourceConfig, gateway: Gateway) -> Self {
        // One timestamp per run: selecting parents newer than their children
        // would trip foreign key checks at delete time.
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let where_clause = config.where_clause.replace("{now}", &now);

        let mut excluded_databases = split_list(&config.excluded_databases);
        for system in SYSTEM_DATABASES {
            if !excluded_databases.iter().any(|d| d == system) {
                excluded_databases.push(system.to_string());
            }
        }
        let excluded_tables = split_list(&config.excluded_tables);

        Self {
            config,
            gateway,
            where_clause,
            excluded_databases,
            excluded_tables,
            plan: None,
            position: 0,
            page: None,
            tables_with_circular_fk: HashSet::new(),
        }
    }

    /// Tables recorded as members of a foreign-key cycle, as `db.table`.
    pub fn tables_with_circular_fk(&self) -> &HashSet<String> {
        &self.tables_with_circular_fk
    }

    fn databases_to_archive(&mut self) -> Result<Vec<String>, ArchiveError> {
        let mut databases = match self.config.databases.as_deref() {
            None | Some("*") => self.gateway.list_databases()?,
            Some(list) => split_list(list),
        };

        let exclusion = exclusion_regex(&self.excluded_databases)?;
        databases.retain(|db| !exclusion.is_match(db));
        Ok(databases)
    }

    fn tables_to_archive(&mut self, database: &str) -> Result<Vec<PlannedTable>, ArchiveError> {
        let database_tables = self.gateway.list_tables(database)?;
        info!("tables list of database '{database}': {database_tables:?}");

        let candidates: Vec<String> = match self.config.tables.as_deref() {
            None | Some("*") => database_tables.clone(),
            Some(list) => split_list(list)
                .into_iter()
                .filter(|t| database_tables.contains(t))
                .collect(),
        };

        debug!(
            "verifying that tables have the '{}' column",
            self.config.deleted_column
        );
        let mut eligible = Vec::new();
        for table in candidates {
            if self
                .gateway
                .has_column(database, &table, &self.config.deleted_column)?
            {
                eligible.push(table);
            } else {
                debug!(
                    "table '{table}' has no column named '{}', ignoring it",
                    self.config.deleted_column
                );
            }
        }

        let exclusion = exclusion_regex(&self.excluded_tables)?;
        debug!("ignoring tables matching '{}'", exclusion.as_str());
        eligible.retain(|t| !exclusion.is_match(t));

        let mut parents_of: HashMap<String, Vec<String>> = HashMap::new();
        for table in &eligible {
            let edges = self.gateway.foreign_keys_of(database, table)?;
            debug!("foreign keys of {table}: {edges:?}");
            parents_of.insert(
                table.clone(),
                edges
                    .iter()
                    .filter(|edge| edge.parent_database == database)
                    .map(|edge| edge.parent_table.clone())
                    .collect(),
            );
        }

        let ordered = order_by_foreign_keys(&eligible, &parents_of);
        debug!("tables ordered depending foreign key dependencies: {ordered:?}");

        for table in circular_tables(&eligible, &parents_of) {
            info!("{database}.{table} is part of a foreign key cycle, deletes will skip FK checks");
            self.tables_with_circular_fk
                .insert(format!("{database}.{table}"));
        }

        let mut planned = Vec::new();
        for table in ordered {
            let has_deleted_column = if eligible.contains(&table) {
                true
            } else {
                self.gateway
                    .has_column(database, &table, &self.config.deleted_column)?
            };
            planned.push(PlannedTable {
                database: database.to_string(),
                table,
                has_deleted_column,
            });
        }
        Ok(planned)
    }

    fn build_plan(&mut self) -> Result<Vec<PlannedTable>, ArchiveError> {
        let databases = self.databases_to_archive()?;
        info!("databases elected for archiving: {databases:?}");

        let mut plan = Vec::new();
        for database in databases {
            let tables = self.tables_to_archive(&database)?;
            info!(
                "tables elected for archiving in {database}: {:?}",
                tables.iter().map(|t| t.table.as_str()).collect::<Vec<_>>()
            );
            plan.extend(tables);
        }
        Ok(plan)
    }

    fn sleep_delete_delay(&self) {
        std::thread::sleep(Duration::from_secs(self.config.delete_loop_delay));
    }

    fn delete_rows(
        &mut self,
        database: &str,
        table: &str,
        rows: &[Row],
        limit: usize,
    ) -> Result<(), ArchiveError> {
        match self.delete_set(database, table, rows, limit) {
            Ok(()) => Ok(()),
            Err(ArchiveError::Db(err)) if err.is_fk_violation() => {
                let message = err.server_message().unwrap_or_default().to_string();
                if let [row] = rows {
                    error!(
                        "hit a row that will never be deleted unless remaining children rows are fixed"
                    );
                    error!("parent row that can not be deleted: {row:?}");
                    error!("to get children items: {}", select_hint(&message, row));
                    error!(
                        "potential fix, check first that the children rows should really be \
                         deleted, then run the archiver again: {}",
                        fix_hint(&message, row, &self.config.deleted_column)
                    );
                    return Ok(());
                }

                // Bisect to isolate the offending row in O(log n) deletes
                error!("integrity error caught, deleting with dichotomy");
                let middle = rows.len().div_ceil(2);
                for half in [&rows[..middle], &rows[middle..]] {
                    debug!("dichotomy delete with a set of {} rows", half.len());
                    self.sleep_delete_delay();
                    self.delete_rows(database, table, half, half.len())?;
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn delete_set(
        &mut self,
        database: &str,
        table: &str,
        rows: &[Row],
        limit: usize,
    ) -> Result<(), ArchiveError> {
        let limit = limit.max(1);
        let primary_key = self.gateway.primary_key(database, table)?;
        let table_ref = TableRef::new(database, table);

        let pk_is_digit = match self.gateway.pk_is_digit(&table_ref) {
            Some(cached) => cached,
            None => {
                let probed = rows
                    .first()
                    .and_then(|row| row.get(primary_key.as_str()))
                    .map(|value| value.is_all_digits())
                    .unwrap_or(false);
                self.gateway.set_pk_is_digit(table_ref.clone(), probed);
                probed
            }
        };

        let fk_check = self
            .tables_with_circular_fk
            .contains(&format!("{database}.{table}"))
            .then_some(false);

        for chunk in rows.chunks(limit) {
            let ids = render_id_list(chunk, &primary_key, pk_is_digit);
            let mut total_deleted: u64 = 0;

            loop {
                if total_deleted > 0 {
                    debug!(
                        "waiting {} seconds before deleting the next subset",
                        self.config.delete_loop_delay
                    );
                    self.sleep_delete_delay();
                }

                let sql = format!(
                    "DELETE FROM {} WHERE `{}` IN ({}) LIMIT {}",
                    qualified_name(database, table),
                    primary_key,
                    ids,
                    limit
                );
                let mut request = DbRequest::execute(sql).database(database).table(table);
                if let Some(enabled) = fk_check {
                    request = request.fk_check(enabled);
                }

                let count = self.gateway.request(request)?.affected();
                info!("{count} rows deleted from {database}.{table}");
                total_deleted += count;

                if count < limit as u64 || total_deleted == chunk.len() as u64 {
                    debug!("no more rows to delete in this data set");
                    break;
                }
            }

            debug!(
                "waiting {} seconds after a deletion",
                self.config.delete_loop_delay
            );
            self.sleep_delete_delay();
        }
        Ok(())
    }
}

impl Source for DbSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn archive_data(&self) -> bool {
        self.config.archive_data
    }

    fn delete_data(&self) -> bool {
        self.config.delete_data
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, ArchiveError> {
        if self.plan.is_none() {
            let plan = self.build_plan()?;
            self.plan = Some(plan);
        }

        loop {
            let planned = match self
                .plan
                .as_ref()
                .and_then(|plan| plan.get(self.position))
            {
                Some(planned) => planned.clone(),
                None => return Ok(None),
            };

            if !planned.has_deleted_column {
                debug!(
                    "skipping {}.{}: no '{}' column, table is listed only for ordering",
                    planned.database, planned.table, self.config.deleted_column
                );
                self.position += 1;
                self.page = None;
                continue;
            }

            if self.page.is_none() {
                info!("{}.{} is to archive", planned.database, planned.table);
                let primary_key = self
                    .gateway
                    .primary_key(&planned.database, &planned.table)?;
                self.page = Some(PageState {
                    primary_key,
                    last_id: "0".to_string(),
                    style: PkStyle::Unknown,
                });
            }

            let sql = {
                let page = self.page.as_ref().expect("page initialized above");
                build_select(
                    &planned.database,
                    &planned.table,
                    page,
                    &self.where_clause,
                    self.config.select_limit,
                )
            };

            let rows = self
                .gateway
                .request(
                    DbRequest::fetch(sql)
                        .database(&planned.database)
                        .table(&planned.table),
                )?
                .rows();
            info!(
                "fetched {} rows from {}.{}",
                rows.len(),
                planned.database,
                planned.table
            );

            if rows.is_empty() {
                self.position += 1;
                self.page = None;
                continue;
            }

            let page = self.page.as_mut().expect("page initialized above");
            let last_value = rows
                .last()
                .and_then(|row| row.get(page.primary_key.as_str()))
                .ok_or_else(|| {
                    ArchiveError::Config(format!(
                        "primary key column '{}' missing from {}.{} result set",
                        page.primary_key, planned.database, planned.table
                    ))
                })?;

            if matches!(page.style, PkStyle::Unknown) {
                let is_digit = last_value.is_all_digits();
                page.style = if is_digit {
                    PkStyle::Digit
                } else {
                    PkStyle::Quoted
                };
                self.gateway.set_pk_is_digit(
                    TableRef::new(planned.database.clone(), planned.table.clone()),
                    is_digit,
                );
            }
            page.last_id = last_value.as_plain_string();

            return Ok(Some(Batch {
                database: planned.database,
                table: planned.table,
                rows,
            }));
        }
    }

    fn delete(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
        if !self.config.delete_data {
            info!("ignoring delete step because delete_data is disabled");
            return Ok(());
        }
        let limit = self.config.delete_limit as usize;
        self.delete_rows(&batch.database, &batch.table, &batch.rows, limit)
    }

    fn clean_exit(&mut self) -> Result<(), ArchiveError> {
        info!("closing source DB connection");
        self.gateway.disconnect();
        Ok(())
    }
}

/// Keyset pagination statement for one page.
fn build_select(
    database: &str,
    table: &str,
    page: &PageState,
    where_clause: &str,
    limit: u64,
) -> String {
    let name = qualified_name(database, table);
    match page.style {
        PkStyle::Unknown => format!(
            "SELECT * FROM {} WHERE {} > '{}' AND {} LIMIT {}",
            name,
            page.primary_key,
            escape_string(&page.last_id),
            where_clause,
            limit
        ),
        PkStyle::Digit => format!(
            "SELECT * FROM {} WHERE {} > {} AND {} LIMIT {}",
            name, page.primary_key, page.last_id, where_clause, limit
        ),
        PkStyle::Quoted => format!(
            "SELECT * FROM {} WHERE {} > '{}' AND {} ORDER BY {} LIMIT {}",
            name,
            page.primary_key,
            escape_string(&page.last_id),
            where_clause,
            page.primary_key,
            limit
        ),
    }
}

/// Comma-separated id list for a DELETE, unquoted for numeric keys.
fn render_id_list(rows: &[Row], primary_key: &str, pk_is_digit: bool) -> String {
    let ids: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get(primary_key))
        .map(|value| value.as_plain_string())
        .collect();

    if pk_is_digit {
        ids.join(", ")
    } else {
        ids.iter()
            .map(|id| format!("\"{}\"", escape_string(id)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkiv_core::Value;

    fn page(style: PkStyle, last_id: &str) -> PageState {
        PageState {
            primary_key: "id".to_string(),
            last_id: last_id.to_string(),
            style,
        }
    }

    #[test]
    fn first_page_quotes_the_cursor_without_ordering() {
        let sql = build_select("nova", "instances", &page(PkStyle::Unknown, "0"), "deleted_at IS NOT NULL", 1000);
        assert_eq!(
            sql,
            "SELECT * FROM `nova`.`instances` WHERE id > '0' AND deleted_at IS NOT NULL LIMIT 1000"
        );
    }

    #[test]
    fn digit_keys_drop_the_quotes() {
        let sql = build_select("nova", "instances", &page(PkStyle::Digit, "42"), "1=1", 10);
        assert_eq!(
            sql,
            "SELECT * FROM `nova`.`instances` WHERE id > 42 AND 1=1 LIMIT 10"
        );
    }

    #[test]
    fn string_keys_keep_quotes_and_force_an_order() {
        let sql = build_select("nova", "instances", &page(PkStyle::Quoted, "a0b1"), "1=1", 10);
        assert_eq!(
            sql,
            "SELECT * FROM `nova`.`instances` WHERE id > 'a0b1' AND 1=1 ORDER BY id LIMIT 10"
        );
    }

    #[test]
    fn id_lists_follow_the_key_kind() {
        let mut row_a = Row::new();
        row_a.insert("id".to_string(), Value::Int(1));
        let mut row_b = Row::new();
        row_b.insert("id".to_string(), Value::Int(2));
        assert_eq!(render_id_list(&[row_a, row_b], "id", true), "1, 2");

        let mut row_c = Row::new();
        row_c.insert("id".to_string(), Value::Text("aa".to_string()));
        let mut row_d = Row::new();
        row_d.insert("id".to_string(), Value::Text("bb".to_string()));
        assert_eq!(
            render_id_list(&[row_c, row_d], "id", false),
            "\"aa\", \"bb\""
        );
    }

    #[test]
    fn now_token_is_substituted_once_per_run() {
        let config = SourceConfig {
            where_clause: "deleted_at IS NOT NULL AND deleted_at < '{now}'".to_string(),
            ..SourceConfig::default()
        };
        let source = DbSource::new(config, Gateway::new(Default::default()));
        assert!(!source.where_clause.contains("{now}"));
        assert!(source.where_clause.starts_with("deleted_at IS NOT NULL AND deleted_at < '"));
    }

    #[test]
    fn system_databases_are_always_excluded() {
        let source = DbSource::new(SourceConfig::default(), Gateway::new(Default::default()));
        for system in SYSTEM_DATABASES {
            assert!(source.excluded_databases.iter().any(|d| d == system));
        }
    }
}
