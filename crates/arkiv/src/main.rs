mod archiver;
mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{error, info, warn};

use crate::archiver::log_error_chain;
use crate::cli::Cli;
use crate::config::Config;
use arkiv_core::ArchiveError;

fn main() {
    let cli = Cli::parse();
    init_logger(cli.effective_level(), cli.log_file.as_deref());
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        }) {
            warn!("unable to install the interrupt handler: {err}");
        }
    }

    let config = match Config::load(&cli.config, cli.dry_run) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    let archivers = match config.archivers(interrupted) {
        Ok(archivers) => archivers,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    for mut archiver in archivers {
        info!("Running archiver {}", archiver.name());
        match archiver.run() {
            Ok(()) => {}
            Err(ArchiveError::Interrupted) => {
                info!("keyboard interrupt detected");
                return 1;
            }
            Err(err) => {
                error!("archiver {} failed: {err}", archiver.name());
                log_error_chain(&err);
                return 1;
            }
        }
    }
    0
}

fn init_logger(level: log::LevelFilter, log_file: Option<&Path>) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_secs();

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!("cannot open log file {}: {err}", path.display());
            }
        }
    }
    builder.init();
}
