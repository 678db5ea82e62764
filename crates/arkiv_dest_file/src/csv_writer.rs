use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use arkiv_core::{ArchiveError, Batch, Value};
use log::{debug, info};

use crate::destination::RowWriter;

struct CsvHandle {
    path: PathBuf,
    writer: csv::Writer<File>,
}

/// One CSV file per (database, table), header taken from the first batch.
pub(crate) struct CsvWriter {
    directory: PathBuf,
    dry_run: bool,
    handles: HashMap<String, CsvHandle>,
}

impl CsvWriter {
    pub(crate) fn new(directory: PathBuf, dry_run: bool) -> Self {
        Self {
            directory,
            dry_run,
            handles: HashMap::new(),
        }
    }
}

impl RowWriter for CsvWriter {
    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
        let key = format!("{}.{}", batch.database, batch.table);
        let path = self.directory.join(format!("{key}.csv"));

        if !self.handles.contains_key(&key) {
            let file = File::create(&path)?;
            let mut writer = csv::Writer::from_writer(file);
            if self.dry_run {
                debug!("[DRY RUN] headers not written in {}", path.display());
            } else {
                debug!("first write set for {key}, adding headers to the CSV file");
                writer.write_record(batch.columns()).map_err(csv_error)?;
            }
            self.handles.insert(
                key.clone(),
                CsvHandle {
                    path: path.clone(),
                    writer,
                },
            );
        }

        info!(
            "CSV formatter: writing {} lines in {}",
            batch.len(),
            path.display()
        );
        if self.dry_run {
            debug!("[DRY RUN] no data written in {}", path.display());
            return Ok(());
        }

        if let Some(handle) = self.handles.get_mut(&key) {
            for row in &batch.rows {
                handle
                    .writer
                    .write_record(row.values().map(csv_field))
                    .map_err(csv_error)?;
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
            handle.writer.flush()?;
        }
        Ok(())
    }
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Bytes(bytes) => format!("\\x{}", hex::encode(bytes)),
        other => other.as_plain_string(),
    }
}

fn csv_error(err: csv::Error) -> ArchiveError {
    ArchiveError::FileWrite(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkiv_core::Row;

    fn batch(rows: Vec<Row>) -> Batch {
        Batch {
            database: "nova".to_string(),
            table: "instances".to_string(),
            rows,
        }
    }

    fn row(id: i64, name: Option<&str>) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(id));
        row.insert(
            "name".to_string(),
            name.map(|n| Value::Text(n.to_string())).unwrap_or(Value::Null),
        );
        row
    }

    #[test]
    fn header_comes_from_the_first_batch_and_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CsvWriter::new(dir.path().to_path_buf(), false);
        writer.write(&batch(vec![row(1, Some("alpha"))])).unwrap();
        writer.write(&batch(vec![row(2, None)])).unwrap();
        writer.close().unwrap();

        let content = std::fs::read_to_string(dir.path().join("nova.instances.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["id,name", "1,alpha", "2,\\N"]);
    }

    #[test]
    fn dry_run_creates_the_file_but_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CsvWriter::new(dir.path().to_path_buf(), true);
        writer.write(&batch(vec![row(1, Some("alpha"))])).unwrap();
        writer.close().unwrap();

        let path = dir.path().join("nova.instances.csv");
        assert!(path.exists());
        assert!(std::fs::read_to_string(path).unwrap().is_empty());
    }
}
