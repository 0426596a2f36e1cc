mod cli;
mod converter;
mod engine;
mod frontmatter;
mod image;
mod logging;
mod metadata;
mod org;

use clap::Parser;
use log::error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let log_config = logging::LogConfig::from_flags(cli.verbose, cli.quiet, cli.log_file);
    if let Err(e) = logging::init(&log_config) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let mut stdout = std::io::stdout();
    match converter::convert(&cli, &mut stdout) {
        Ok(summary) => {
            println!("Converted {}/{} files", summary.succeeded, summary.total);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
