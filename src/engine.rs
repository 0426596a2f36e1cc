//! Document conversion engines.

use crate::org;
use anyhow::{bail, Context, Result};
use log::debug;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Markup languages a document can be converted between.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dialect {
    Markdown,
    Org,
}

impl Dialect {
    /// File extension used for this dialect.
    pub fn extension(self) -> &'static str {
        match self {
            Dialect::Markdown => "md",
            Dialect::Org => "org",
        }
    }

    fn pandoc_name(self) -> &'static str {
        match self {
            Dialect::Markdown => "markdown",
            Dialect::Org => "org",
        }
    }
}

/// Line wrapping in the converted text.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wrap {
    /// Paragraphs are emitted on a single line.
    None,
    /// Source line breaks are kept.
    Preserve,
}

#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// Treat raw HTML as part of the input and pass it through.
    pub raw_html: bool,
    pub wrap: Wrap,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            raw_html: true,
            wrap: Wrap::None,
        }
    }
}

/// Something that can convert document text from one markup to another.
pub trait Engine {
    fn convert(&self, body: &str, from: Dialect, to: Dialect, options: &ConvertOptions)
        -> Result<String>;
}

/// In-process Markdown to Org conversion.
#[derive(Debug, Default)]
pub struct NativeEngine;

impl Engine for NativeEngine {
    fn convert(
        &self,
        body: &str,
        from: Dialect,
        to: Dialect,
        options: &ConvertOptions,
    ) -> Result<String> {
        if (from, to) != (Dialect::Markdown, Dialect::Org) {
            bail!("Native engine cannot convert {:?} to {:?}", from, to);
        }
        Ok(org::markdown_to_org(body, options))
    }
}

/// Conversion through an external `pandoc` process.
#[derive(Debug)]
pub struct PandocEngine {
    program: PathBuf,
}

impl PandocEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(from: Dialect, to: Dialect, options: &ConvertOptions) -> Vec<String> {
        let mut from_arg = from.pandoc_name().to_string();
        if options.raw_html && from == Dialect::Markdown {
            from_arg.push_str("+raw_html");
        }
        let wrap = match options.wrap {
            Wrap::None => "none",
            Wrap::Preserve => "preserve",
        };
        vec![
            "-f".to_string(),
            from_arg,
            "-t".to_string(),
            to.pandoc_name().to_string(),
            format!("--wrap={}", wrap),
        ]
    }
}

impl Engine for PandocEngine {
    fn convert(
        &self,
        body: &str,
        from: Dialect,
        to: Dialect,
        options: &ConvertOptions,
    ) -> Result<String> {
        let args = Self::args(from, to, options);
        debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        // Feed stdin from a separate thread so a full stdout pipe cannot deadlock us.
        let mut stdin = child.stdin.take().context("pandoc stdin unavailable")?;
        let input = body.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .context("Failed to read pandoc output")?;
        let written = writer.join();

        if !output.status.success() {
            bail!(
                "pandoc exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        match written {
            Ok(result) => result.context("Failed to write to pandoc")?,
            Err(_) => bail!("pandoc input thread panicked"),
        }
        String::from_utf8(output.stdout).context("pandoc produced invalid UTF-8")
    }
}
