use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use arkiv_core::{ArchiveError, Batch, Row};
use arkiv_gateway::{Gateway, escape_string};
use log::{debug, info};

use crate::destination::RowWriter;

struct SqlHandle {
    path: PathBuf,
    file: BufWriter<File>,
}

/// One SQL file per (database, table); each row becomes an idempotent
/// `INSERT … ON DUPLICATE KEY UPDATE` statement so the file can be replayed.
///
/// The primary key in the upsert clause is resolved against the source
/// table, not any destination schema.
pub(crate) struct SqlWriter {
    directory: PathBuf,
    dry_run: bool,
    gateway: Gateway,
    handles: HashMap<String, SqlHandle>,
}

impl SqlWriter {
    pub(crate) fn new(directory: PathBuf, dry_run: bool, gateway: Gateway) -> Self {
        Self {
            directory,
            dry_run,
            gateway,
            handles: HashMap::new(),
        }
    }
}

impl RowWriter for SqlWriter {
    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
        let key = format!("{}.{}", batch.database, batch.table);
        let path = self.directory.join(format!("{key}.sql"));

        if !self.handles.contains_key(&key) {
            let file = BufWriter::new(File::create(&path)?);
            self.handles.insert(
                key.clone(),
                SqlHandle {
                    path: path.clone(),
                    file,
                },
            );
        }

        let primary_key = self.gateway.primary_key(&batch.database, &batch.table)?;
        info!(
            "SQL formatter: writing {} lines in {}",
            batch.len(),
            path.display()
        );
        if self.dry_run {
            debug!("[DRY RUN] no data written in {}", path.display());
            return Ok(());
        }

        if let Some(handle) = self.handles.get_mut(&key) {
            for row in &batch.rows {
                let line = render_insert_line(&batch.database, &batch.table, row, &primary_key);
                handle.file.write_all(line.as_bytes())?;
            }
        }
        Ok(())
    }

    fn files(&self) -> Vec<PathBuf> {
        self.handles.values().map(|h| h.path.clone()).collect()
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        for handle in self.handles.values_mut() {
            info!("closing handler of {}", handle.path.display());
            handle.file.flush()?;
        }
        Ok(())
    }
}

/// Render one replayable insert; NULL stays an unquoted keyword, everything
/// else is escaped the way the server expects inside single quotes.
fn render_insert_line(database: &str, table: &str, row: &Row, primary_key: &str) -> String {
    let columns = row
        .keys()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");
    let values = row
        .values()
        .map(|value| {
            if value.is_null() {
                "NULL".to_string()
            } else {
                format!("'{}'", escape_string(&value.as_plain_string()))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {database}.{table} ({columns}) VALUES ({values}) \
         ON DUPLICATE KEY UPDATE {primary_key} = {primary_key};\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkiv_core::Value;

    #[test]
    fn rows_become_idempotent_upserts() {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(7));
        row.insert("name".to_string(), Value::Text("al'pha".to_string()));
        row.insert("deleted_at".to_string(), Value::Null);

        let line = render_insert_line("nova", "instances", &row, "id");
        assert_eq!(
            line,
            "INSERT INTO nova.instances (`id`, `name`, `deleted_at`) \
             VALUES ('7', 'al\\'pha', NULL) ON DUPLICATE KEY UPDATE id = id;\n"
        );
    }
}
