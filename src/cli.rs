use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Convert a tree of Markdown notes to Org-mode files
#[derive(Parser, Debug)]
#[command(name = "md2org", version, about)]
pub struct Cli {
    /// Directory containing the Markdown files to convert
    pub source: PathBuf,

    /// Directory the Org files are written to (created if missing)
    pub dest: PathBuf,

    /// Conversion engine used for the document body
    #[arg(long, value_enum, default_value_t = EngineKind::Native)]
    pub engine: EngineKind,

    /// Path to the pandoc executable (only used with `--engine pandoc`)
    #[arg(long, default_value = "pandoc")]
    pub pandoc: PathBuf,

    /// Suffix appended to the backup copy made beside each source file
    #[arg(long, default_value = ".bak", value_parser = NonEmptyStringValueParser::new())]
    pub backup_suffix: String,

    /// Keep source line breaks inside paragraphs instead of joining them
    #[arg(long, default_value_t = false)]
    pub preserve_breaks: bool,

    /// Do not copy images or rewrite image links
    #[arg(long, default_value_t = false)]
    pub no_images: bool,

    /// Write logs to md2org.log in the working directory instead of stderr
    #[arg(long, default_value_t = false)]
    pub log_file: bool,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, default_value_t = false, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// Built-in pulldown-cmark renderer
    Native,
    /// External pandoc process
    Pandoc,
}
