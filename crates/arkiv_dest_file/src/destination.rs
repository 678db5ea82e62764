use std::collections::BTreeMap;
use std::path::PathBuf;

use arkiv_core::{ArchiveError, Batch, Destination};
use arkiv_gateway::Gateway;
use log::{error, info};

use crate::compress::compress;
use crate::csv_writer::CsvWriter;
use crate::sql_writer::SqlWriter;

/// Final compression applied to every produced file at clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
    GzTar,
    BzTar,
    XzTar,
}

impl ArchiveFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tar" => Some(Self::Tar),
            "zip" => Some(Self::Zip),
            "gztar" => Some(Self::GzTar),
            "bztar" => Some(Self::BzTar),
            "xztar" => Some(Self::XzTar),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::GzTar => "gztar",
            Self::BzTar => "bztar",
            Self::XzTar => "xztar",
        }
    }
}

/// File formats a batch can be rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileFormat {
    Csv,
    Sql,
}

impl FileFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "csv" => Some(Self::Csv),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }
}

/// Per-format writer contract: append a batch, report produced files, close.
pub(crate) trait RowWriter {
    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError>;
    fn files(&self) -> Vec<PathBuf>;
    fn close(&mut self) -> Result<(), ArchiveError>;
}

/// Configuration of one file destination section.
#[derive(Debug, Clone)]
pub struct FileDestConfig {
    pub name: String,
    /// Target directory; may contain `{date}`.
    pub directory: String,
    pub archive_format: ArchiveFormat,
    pub formats: Vec<FileFormat>,
}

/// Archive destination writing one file per (database, table) and format.
///
/// Writers are instantiated lazily and cached by format; `clean_exit` closes
/// every handle and compresses each produced file into the configured
/// archive format.
pub struct FileDestination {
    name: String,
    directory: PathBuf,
    archive_format: ArchiveFormat,
    formats: Vec<FileFormat>,
    writers: BTreeMap<FileFormat, Box<dyn RowWriter>>,
    /// Handed to the SQL writer on first use; it resolves primary keys
    /// against the source, not the destination.
    src_gateway: Option<Gateway>,
    dry_run: bool,
}

impl FileDestination {
    pub fn new(
        config: FileDestConfig,
        src_gateway: Gateway,
        dry_run: bool,
    ) -> Result<Self, ArchiveError> {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S").to_string();
        let directory = PathBuf::from(config.directory.replace("{date}", &stamp));
        std::fs::create_dir_all(&directory)?;

        Ok(Self {
            name: config.name,
            directory,
            archive_format: config.archive_format,
            formats: config.formats,
            writers: BTreeMap::new(),
            src_gateway: Some(src_gateway),
            dry_run,
        })
    }

    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    fn write_format(&mut self, format: FileFormat, batch: &Batch) -> Result<(), ArchiveError> {
        if !self.writers.contains_key(&format) {
            let writer: Box<dyn RowWriter> = match format {
                FileFormat::Csv => {
                    Box::new(CsvWriter::new(self.directory.clone(), self.dry_run))
                }
                FileFormat::Sql => {
                    let gateway = self.src_gateway.take().ok_or_else(|| {
                        ArchiveError::Config("source gateway already consumed".to_string())
                    })?;
                    Box::new(SqlWriter::new(self.directory.clone(), self.dry_run, gateway))
                }
            };
            self.writers.insert(format, writer);
        }

        match self.writers.get_mut(&format) {
            Some(writer) => writer.write(batch),
            None => Ok(()),
        }
    }
}

impl Destination for FileDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &Batch) -> Result<(), ArchiveError> {
        info!(
            "writing {} rows of {}.{} on the file backend",
            batch.len(),
            batch.database,
            batch.table
        );
        for format in self.formats.clone() {
            self.write_format(format, batch)?;
        }
        Ok(())
    }

    fn clean_exit(&mut self) -> Result<(), ArchiveError> {
        let mut produced = Vec::new();
        for writer in self.writers.values_mut() {
            writer.close()?;
            produced.extend(writer.files());
        }

        for file in produced {
            if self.dry_run {
                info!("[DRY RUN] skipping compression of {}", file.display());
                std::fs::remove_file(&file)?;
                continue;
            }
            info!(
                "archiving {} using {} format",
                file.display(),
                self.archive_format.name()
            );
            let archived = compress(&file, self.archive_format)?;
            info!("compressed file available at {}", archived.display());
            std::fs::remove_file(&file)?;
        }

        if self.dry_run {
            info!(
                "removing target directory {} because dry-run mode is enabled",
                self.directory.display()
            );
            if let Err(err) = std::fs::remove_dir(&self.directory) {
                error!("unable to remove dest directory (certainly not an empty dir): {err}");
            }
        }
        Ok(())
    }
}
