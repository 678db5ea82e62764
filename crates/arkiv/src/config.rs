use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arkiv_core::{ArchiveError, DestinationBackend, SourceBackend};
use arkiv_dest_db::{DbDestConfig, DbDestination};
use arkiv_dest_file::{ArchiveFormat, FileDestConfig, FileDestination, FileFormat};
use arkiv_gateway::{Gateway, GatewayConfig};
use arkiv_source::{DEFAULT_WHERE, DbSource, SourceConfig, split_list};
use indexmap::IndexMap;
use ini::Ini;
use log::{debug, info};
use regex::Regex;
use std::sync::LazyLock;

use crate::archiver::Archiver;

/// `${key}` or `${section:key}` references, configparser-style.
static INTERPOLATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("interpolation pattern compiles"));

const MAX_INTERPOLATION_DEPTH: usize = 10;

type Section = IndexMap<String, String>;

/// Parsed configuration: sections with `DEFAULT` values merged in and
/// interpolation resolved, bound to archiver pipelines on demand.
pub struct Config {
    sections: IndexMap<String, Section>,
    dry_run: bool,
}

impl Config {
    pub fn load(path: &Path, dry_run: bool) -> Result<Self, ArchiveError> {
        info!("loading configuration file {}", path.display());
        let ini = Ini::load_from_file(path)
            .map_err(|e| ArchiveError::Config(format!("cannot read {}: {e}", path.display())))?;

        let defaults: Section = ini
            .section(Some("DEFAULT"))
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut sections = IndexMap::new();
        for (name, props) in ini.iter() {
            let Some(name) = name else { continue };
            if name == "DEFAULT" {
                continue;
            }
            let mut merged = defaults.clone();
            for (key, value) in props.iter() {
                merged.insert(key.to_string(), value.to_string());
            }
            sections.insert(name.to_string(), merged);
        }

        let resolved = interpolate_sections(sections)?;
        debug!("configuration sections: {:?}", resolved.keys().collect::<Vec<_>>());
        Ok(Self {
            sections: resolved,
            dry_run,
        })
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Instantiate every enabled archiver with its source and destinations.
    pub fn archivers(
        &self,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Vec<Archiver>, ArchiveError> {
        let mut archivers = Vec::new();

        for (name, section) in &self.sections {
            if !name.starts_with("archiver:") {
                continue;
            }
            let display_name = name.trim_start_matches("archiver:").to_string();

            if !get_bool(section, "enable", false)? {
                info!("archiver {name} is disabled, ignoring it");
                continue;
            }

            let src_list = section
                .get("src")
                .map(|raw| split_list(raw))
                .unwrap_or_default();
            if src_list.is_empty() {
                return Err(ArchiveError::Config(format!(
                    "archiver '{display_name}' declares no src section"
                )));
            }
            // destinations are optional: deleting without archiving is valid
            let dst_list = section
                .get("dst")
                .map(|raw| split_list(raw))
                .unwrap_or_default();

            for src_name in &src_list {
                let src_section = self.named_section("src", src_name)?;
                let source = self.build_source(src_name, src_section)?;

                let mut destinations: Vec<Box<dyn arkiv_core::Destination>> = Vec::new();
                for dst_name in &dst_list {
                    let dst_section = self.named_section("dst", dst_name)?;
                    destinations.push(self.build_destination(dst_name, dst_section, src_section)?);
                }

                archivers.push(Archiver::new(
                    display_name.clone(),
                    Box::new(source),
                    destinations,
                    interrupted.clone(),
                ));
            }
        }
        Ok(archivers)
    }

    fn named_section(&self, kind: &str, name: &str) -> Result<&Section, ArchiveError> {
        let full = format!("{kind}:{name}");
        self.sections
            .get(&full)
            .ok_or_else(|| ArchiveError::Config(format!("missing section [{full}]")))
    }

    fn gateway_config(&self, section: &Section) -> Result<GatewayConfig, ArchiveError> {
        Ok(GatewayConfig {
            host: section
                .get("host")
                .cloned()
                .ok_or_else(|| ArchiveError::Config("missing 'host'".to_string()))?,
            port: get_u64(section, "port", 3306)? as u16,
            user: section
                .get("user")
                .cloned()
                .ok_or_else(|| ArchiveError::Config("missing 'user'".to_string()))?,
            password: section.get("password").cloned().unwrap_or_default(),
            max_retries: get_u64(section, "max_retries", 5)? as u32,
            retry_time_limit: get_u64(section, "retry_time_limit", 2)?,
            dry_run: self.dry_run,
        })
    }

    fn build_source(&self, name: &str, section: &Section) -> Result<DbSource, ArchiveError> {
        let backend = section.get("backend").map(String::as_str).unwrap_or("db");
        if SourceBackend::from_name(backend).is_none() {
            return Err(ArchiveError::Config(format!(
                "unknown source backend '{backend}' in [src:{name}]"
            )));
        }

        let config = SourceConfig {
            name: name.to_string(),
            databases: section.get("databases").cloned(),
            tables: section.get("tables").cloned(),
            excluded_databases: section
                .get("excluded_databases")
                .cloned()
                .unwrap_or_default(),
            excluded_tables: section.get("excluded_tables").cloned().unwrap_or_default(),
            deleted_column: section
                .get("deleted_column")
                .cloned()
                .unwrap_or_else(|| "deleted_at".to_string()),
            where_clause: section
                .get("where")
                .cloned()
                .unwrap_or_else(|| DEFAULT_WHERE.to_string()),
            archive_data: get_bool(section, "archive_data", false)?,
            delete_data: get_bool(section, "delete_data", false)?,
            select_limit: get_u64(section, "select_limit", 1000)?,
            delete_limit: get_u64(section, "delete_limit", 500)?,
            delete_loop_delay: get_u64(section, "delete_loop_delay", 2)?,
        };
        let gateway = Gateway::new(self.gateway_config(section)?);
        Ok(DbSource::new(config, gateway))
    }

    fn build_destination(
        &self,
        name: &str,
        section: &Section,
        src_section: &Section,
    ) -> Result<Box<dyn arkiv_core::Destination>, ArchiveError> {
        let backend = section
            .get("backend")
            .ok_or_else(|| ArchiveError::Config(format!("[dst:{name}] has no backend")))?;

        match DestinationBackend::from_name(backend) {
            Some(DestinationBackend::Db) => {
                let config = DbDestConfig {
                    name: name.to_string(),
                    db_suffix: section.get("db_suffix").cloned().unwrap_or_default(),
                    table_suffix: section.get("table_suffix").cloned().unwrap_or_default(),
                    archive_data: get_bool(section, "archive_data", false)?,
                    bulk_insert: get_u64(section, "bulk_insert", 1000)?,
                };
                let src_gateway = Gateway::new(self.gateway_config(src_section)?);
                let dst_gateway = Gateway::new(self.gateway_config(section)?);
                Ok(Box::new(DbDestination::new(config, src_gateway, dst_gateway)))
            }
            Some(DestinationBackend::File) => {
                let directory = section.get("directory").cloned().ok_or_else(|| {
                    ArchiveError::Config(format!("[dst:{name}] has no directory"))
                })?;
                let archive_format_name = section
                    .get("archive_format")
                    .map(String::as_str)
                    .unwrap_or("tar");
                let archive_format =
                    ArchiveFormat::from_name(archive_format_name).ok_or_else(|| {
                        ArchiveError::Config(format!(
                            "unknown archive format '{archive_format_name}' in [dst:{name}]"
                        ))
                    })?;

                let format_names = section
                    .get("formats")
                    .map(|raw| split_list(raw))
                    .unwrap_or_else(|| vec!["csv".to_string()]);
                let mut formats = Vec::new();
                for format_name in &format_names {
                    let format = FileFormat::from_name(format_name).ok_or_else(|| {
                        ArchiveError::Config(format!(
                            "unknown file format '{format_name}' in [dst:{name}]"
                        ))
                    })?;
                    if !formats.contains(&format) {
                        formats.push(format);
                    }
                }

                let config = FileDestConfig {
                    name: name.to_string(),
                    directory,
                    archive_format,
                    formats,
                };
                let src_gateway = Gateway::new(self.gateway_config(src_section)?);
                Ok(Box::new(FileDestination::new(
                    config,
                    src_gateway,
                    self.dry_run,
                )?))
            }
            None => Err(ArchiveError::Config(format!(
                "unknown destination backend '{backend}' in [dst:{name}]"
            ))),
        }
    }
}

fn interpolate_sections(
    sections: IndexMap<String, Section>,
) -> Result<IndexMap<String, Section>, ArchiveError> {
    let snapshot = sections.clone();
    let mut resolved = IndexMap::new();

    for (section_name, section) in sections {
        let mut out = Section::new();
        for (key, value) in &section {
            out.insert(
                key.clone(),
                interpolate_value(value, &section, &snapshot, &section_name, key)?,
            );
        }
        resolved.insert(section_name, out);
    }
    Ok(resolved)
}

fn interpolate_value(
    raw: &str,
    section: &Section,
    sections: &IndexMap<String, Section>,
    section_name: &str,
    key: &str,
) -> Result<String, ArchiveError> {
    let mut value = raw.to_string();
    for _ in 0..MAX_INTERPOLATION_DEPTH {
        if !value.contains("${") {
            return Ok(value);
        }

        let mut failed = None;
        value = INTERPOLATION_RE
            .replace_all(&value, |caps: &regex::Captures<'_>| {
                let reference = &caps[1];
                let looked_up = match reference.split_once(':') {
                    Some((other_section, other_key)) => sections
                        .get(other_section)
                        .and_then(|s| s.get(other_key)),
                    None => section.get(reference),
                };
                match looked_up {
                    Some(found) => found.clone(),
                    None => {
                        failed = Some(reference.to_string());
                        String::new()
                    }
                }
            })
            .into_owned();

        if let Some(reference) = failed {
            return Err(ArchiveError::Config(format!(
                "unresolvable reference '${{{reference}}}' in [{section_name}] {key}"
            )));
        }
    }
    Err(ArchiveError::Config(format!(
        "interpolation depth exceeded in [{section_name}] {key}"
    )))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn get_bool(section: &Section, key: &str, default: bool) -> Result<bool, ArchiveError> {
    match section.get(key) {
        None => Ok(default),
        Some(raw) => parse_bool(raw)
            .ok_or_else(|| ArchiveError::Config(format!("'{key}' is not a boolean: '{raw}'"))),
    }
}

fn get_u64(section: &Section, key: &str, default: u64) -> Result<u64, ArchiveError> {
    match section.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ArchiveError::Config(format!("'{key}' is not a number: '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arkiv.conf");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn default_section_values_flow_into_every_section() {
        let (_dir, path) = write_config(
            "[DEFAULT]\nhost = db.local\nuser = archiver\n\n\
             [src:main]\npassword = secret\n",
        );
        let config = Config::load(&path, false).unwrap();
        let section = config.section("src:main").unwrap();
        assert_eq!(section.get("host").unwrap(), "db.local");
        assert_eq!(section.get("user").unwrap(), "archiver");
        assert_eq!(section.get("password").unwrap(), "secret");
    }

    #[test]
    fn interpolation_resolves_local_and_cross_section_references() {
        let (_dir, path) = write_config(
            "[DEFAULT]\nbase = /var/archives\n\n\
             [src:main]\nhost = db.local\nuser = u\n\n\
             [dst:files]\ndirectory = ${base}/${src:main:host}\n",
        );
        let config = Config::load(&path, false).unwrap();
        let section = config.section("dst:files").unwrap();
        assert_eq!(section.get("directory").unwrap(), "/var/archives/db.local");
    }

    #[test]
    fn unresolvable_references_are_config_errors() {
        let (_dir, path) = write_config("[src:main]\nwhere = ${missing}\n");
        assert!(matches!(
            Config::load(&path, false),
            Err(ArchiveError::Config(_))
        ));
    }

    #[test]
    fn booleans_accept_the_usual_spellings() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    fn minimal_pipeline(extra_archiver: &str, extra_dst: &str) -> String {
        format!(
            "[DEFAULT]\nhost = db.local\nuser = archiver\npassword = s\n\n\
             [archiver:nova]\nenable = 1\nsrc = main\n{extra_archiver}\n\
             [src:main]\narchive_data = 1\ndelete_data = 0\n\n\
             {extra_dst}"
        )
    }

    #[test]
    fn disabled_archivers_are_skipped() {
        let (_dir, path) = write_config(
            "[archiver:off]\nenable = 0\nsrc = main\n\n\
             [src:main]\nhost = h\nuser = u\n",
        );
        let config = Config::load(&path, false).unwrap();
        let archivers = config
            .archivers(Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert!(archivers.is_empty());
    }

    #[test]
    fn a_db_pipeline_binds_source_and_destination() {
        let (_dir, path) = write_config(&minimal_pipeline(
            "dst = mirror\n",
            "[dst:mirror]\nbackend = db\narchive_data = 1\ndb_suffix = _archive\n",
        ));
        let config = Config::load(&path, false).unwrap();
        let archivers = config
            .archivers(Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert_eq!(archivers.len(), 1);
        assert_eq!(archivers[0].name(), "nova");
    }

    #[test]
    fn a_file_pipeline_creates_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let content = minimal_pipeline(
            "dst = files\n",
            &format!(
                "[dst:files]\nbackend = file\ndirectory = {}\nformats = csv,sql\narchive_format = gztar\n",
                target.display()
            ),
        );
        let path = dir.path().join("arkiv.conf");
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path, false).unwrap();
        let archivers = config
            .archivers(Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert_eq!(archivers.len(), 1);
        assert!(target.is_dir());
    }

    #[test]
    fn unknown_backends_are_rejected() {
        let (_dir, path) = write_config(&minimal_pipeline(
            "dst = cloud\n",
            "[dst:cloud]\nbackend = swift\ncontainer = x\n",
        ));
        let config = Config::load(&path, false).unwrap();
        let result = config.archivers(Arc::new(AtomicBool::new(false)));
        assert!(matches!(result, Err(ArchiveError::Config(message)) if message.contains("swift")));
    }

    #[test]
    fn missing_sections_are_rejected() {
        let (_dir, path) = write_config(
            "[archiver:broken]\nenable = 1\nsrc = ghost\n",
        );
        let config = Config::load(&path, false).unwrap();
        let result = config.archivers(Arc::new(AtomicBool::new(false)));
        assert!(matches!(result, Err(ArchiveError::Config(message)) if message.contains("src:ghost")));
    }
}
