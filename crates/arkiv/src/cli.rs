use clap::Parser;
use std::path::PathBuf;

/// Archive soft-deleted rows out of MySQL/MariaDB databases.
#[derive(Parser, Debug)]
#[command(name = "arkiv", version)]
pub struct Cli {
    /// Configuration file to read
    #[arg(long, value_parser = existing_file)]
    pub config: PathBuf,

    /// Append logs to the specified file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Set the log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Enable debug mode (shortcut for --log-level debug)
    #[arg(long)]
    pub debug: bool,

    /// Display what would be done without really deleting or writing data
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl Cli {
    pub fn effective_level(&self) -> log::LevelFilter {
        if self.debug {
            return log::LevelFilter::Debug;
        }
        match self.log_level {
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

fn existing_file(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("{raw}: no such file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_log_level() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("arkiv.conf");
        std::fs::write(&config, "").unwrap();
        let config = config.to_string_lossy().into_owned();

        let cli = Cli::parse_from(["arkiv", "--config", &config, "--log-level", "warn"]);
        assert_eq!(cli.effective_level(), log::LevelFilter::Warn);

        let cli = Cli::parse_from(["arkiv", "--config", &config, "--log-level", "warn", "--debug"]);
        assert_eq!(cli.effective_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn missing_config_file_is_rejected() {
        let result = Cli::try_parse_from(["arkiv", "--config", "/nonexistent/arkiv.conf"]);
        assert!(result.is_err());
    }
}
