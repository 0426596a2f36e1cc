//! Logger setup for a single run.

use anyhow::{Context, Result};
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Fixed name of the log file used with `--log-file`.
pub const LOG_FILE_NAME: &str = "md2org.log";

/// How the logger for this invocation should behave.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_flags(verbose: u8, quiet: bool, to_file: bool) -> Self {
        let level = if quiet {
            LevelFilter::Warn
        } else {
            match verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        };
        Self {
            level,
            file: to_file.then(|| PathBuf::from(LOG_FILE_NAME)),
        }
    }

    fn builder(&self) -> Result<Builder> {
        let mut builder = Builder::new();
        builder
            .filter_level(self.level)
            .parse_default_env()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} - {} - {}",
                    buf.timestamp(),
                    record.level(),
                    record.args()
                )
            });

        if let Some(ref path) = self.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            builder.target(Target::Pipe(Box::new(file)));
        } else {
            builder.target(Target::Stderr);
        }

        Ok(builder)
    }
}

/// Install the logger described by `config`.
pub fn init(config: &LogConfig) -> Result<()> {
    config
        .builder()?
        .try_init()
        .context("A logger is already installed")
}
