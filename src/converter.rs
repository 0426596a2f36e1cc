use crate::cli::{Cli, EngineKind};
use crate::engine::{ConvertOptions, Dialect, Engine, NativeEngine, PandocEngine, Wrap};
use crate::frontmatter;
use crate::image::ImageRewriter;
use crate::metadata;
use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use serde_yaml::Value;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Per-run settings for the conversion pipeline.
#[derive(Debug, Clone)]
pub struct Options {
    pub backup_suffix: String,
    /// Copy referenced images and rewrite their links.
    pub images: bool,
    pub convert: ConvertOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backup_suffix: ".bak".to_string(),
            images: true,
            convert: ConvertOptions::default(),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default, PartialEq)]
pub struct Summary {
    pub succeeded: usize,
    pub total: usize,
    /// Source files that could not be converted.
    pub failed: Vec<PathBuf>,
}

pub struct Converter {
    engine: Box<dyn Engine>,
    options: Options,
}

/// Run the conversion described by the command line.
pub fn convert(cli: &Cli, progress: &mut dyn Write) -> Result<Summary> {
    let engine: Box<dyn Engine> = match cli.engine {
        EngineKind::Native => Box::new(NativeEngine),
        EngineKind::Pandoc => Box::new(PandocEngine::new(&cli.pandoc)),
    };
    let options = Options {
        backup_suffix: cli.backup_suffix.clone(),
        images: !cli.no_images,
        convert: ConvertOptions {
            raw_html: true,
            wrap: if cli.preserve_breaks {
                Wrap::Preserve
            } else {
                Wrap::None
            },
        },
    };
    Converter::new(engine, options).run(&cli.source, &cli.dest, progress)
}

impl Converter {
    pub fn new(engine: Box<dyn Engine>, options: Options) -> Self {
        Self { engine, options }
    }

    /// Convert every Markdown file under `src_root` into `dst_root`.
    ///
    /// Only setup problems are returned as errors; a file that fails to
    /// convert is logged and counted in the summary.
    pub fn run(&self, src_root: &Path, dst_root: &Path, progress: &mut dyn Write) -> Result<Summary> {
        if !src_root.is_dir() {
            bail!("Source directory not found: {}", src_root.display());
        }
        fs::create_dir_all(dst_root).with_context(|| {
            format!(
                "Failed to create destination directory: {}",
                dst_root.display()
            )
        })?;

        let md_files = find_markdown(src_root);
        info!("Found {} markdown files to process", md_files.len());

        let mut summary = Summary {
            total: md_files.len(),
            ..Summary::default()
        };
        if md_files.is_empty() {
            warn!("No markdown files found in {}", src_root.display());
            return Ok(summary);
        }

        for md in md_files {
            let org = destination_path(src_root, dst_root, &md);
            info!("Converting: {}", md.display());

            match self.convert_file(&md, &org) {
                Ok(()) => {
                    summary.succeeded += 1;
                    info!("Successfully converted to: {}", org.display());
                }
                Err(e) => {
                    error!("Failed to convert {}: {:#}", md.display(), e);
                    summary.failed.push(md);
                }
            }
            writeln!(progress, "{}/{}", summary.succeeded, summary.total)?;
        }

        info!("Converted {}/{} files", summary.succeeded, summary.total);
        if !summary.failed.is_empty() {
            warn!("{} files failed to convert", summary.failed.len());
        }
        Ok(summary)
    }

    /// Convert one Markdown file to `org_path`.
    pub fn convert_file(&self, md_path: &Path, org_path: &Path) -> Result<()> {
        backup(md_path, &self.options.backup_suffix)?;

        let text = fs::read_to_string(md_path)
            .with_context(|| format!("Failed to read {}", md_path.display()))?;
        let (front_matter, body) = frontmatter::split(&text);
        let metadata = metadata::normalize(&Value::Mapping(front_matter));

        let body = if self.options.images {
            ImageRewriter::new(md_path, org_path).rewrite(body)
        } else {
            body.to_string()
        };

        let converted = self
            .engine
            .convert(&body, Dialect::Markdown, Dialect::Org, &self.options.convert)
            .context("Conversion engine failed")?;

        let content = metadata::format_properties(&metadata) + &converted;
        write_atomic(org_path, &content)
    }
}

/// All Markdown files below `root`, in path order.
fn find_markdown(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        // `Path::is_file` follows symlinks, so linked notes are converted too.
        .filter(|e| {
            e.path().is_file()
                && e.path()
                    .extension()
                    .map_or(false, |ext| ext == Dialect::Markdown.extension())
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Mirror `md_path` from `src_root` into `dst_root` with an Org extension.
pub fn destination_path(src_root: &Path, dst_root: &Path, md_path: &Path) -> PathBuf {
    let relative = md_path.strip_prefix(src_root).unwrap_or(md_path);
    dst_root
        .join(relative)
        .with_extension(Dialect::Org.extension())
}

fn backup(path: &Path, suffix: &str) -> Result<PathBuf> {
    let mut name: OsString = path
        .file_name()
        .context("Source file has no name")?
        .to_os_string();
    name.push(suffix);
    let backup = path.with_file_name(name);
    if backup == path {
        bail!("Backup of {} would overwrite the source", path.display());
    }
    fs::copy(path, &backup)
        .with_context(|| format!("Failed to back up {}", path.display()))?;
    Ok(backup)
}

/// Write `content` through a temporary file so `path` is never left half-written.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write output file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tempfile::TempDir;

    /// Fails on any body mentioning "boom".
    struct Picky;

    impl Engine for Picky {
        fn convert(&self, body: &str, _: Dialect, _: Dialect, _: &ConvertOptions) -> Result<String> {
            if body.contains("boom") {
                bail!("cannot handle this");
            }
            Ok(body.to_uppercase())
        }
    }

    fn native() -> Converter {
        Converter::new(Box::new(NativeEngine), Options::default())
    }

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn converts_nested_note() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("a/b/note.md"), "---\ntitle: Test\n---\n# Hi\n");

        let mut progress: Vec<u8> = Vec::new();
        let summary = native().run(&src, &dst, &mut progress).unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total, 1);
        assert!(summary.failed.is_empty());
        assert_eq!(String::from_utf8(progress).unwrap(), "1/1\n");
        assert_eq!(
            fs::read_to_string(dst.join("a/b/note.org")).unwrap(),
            ":PROPERTIES:\n:TITLE: Test\n:END:\n* Hi\n"
        );
    }

    #[test]
    fn backups_are_made_and_not_reconverted() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("note.md"), "body\n");

        native().run(&src, &dst, &mut io::sink()).unwrap();
        assert_eq!(fs::read_to_string(src.join("note.md.bak")).unwrap(), "body\n");

        let summary = native().run(&src, &dst, &mut io::sink()).unwrap();
        assert_eq!(summary.total, 1);
        assert!(!dst.join("note.md.org").exists());
    }

    #[test]
    fn failures_are_counted_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("a.md"), "fine\n");
        write(&src.join("b.md"), "boom\n");
        write(&src.join("c.md"), "also fine\n");

        let converter = Converter::new(Box::new(Picky), Options::default());
        let mut progress: Vec<u8> = Vec::new();
        let summary = converter.run(&src, &dst, &mut progress).unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, vec![src.join("b.md")]);
        assert_eq!(String::from_utf8(progress).unwrap(), "1/3\n1/3\n2/3\n");
        assert!(dst.join("a.org").exists());
        assert!(!dst.join("b.org").exists());
        assert_eq!(
            fs::read_to_string(dst.join("c.org")).unwrap(),
            ":PROPERTIES:\n:END:\nALSO FINE\n"
        );
    }

    #[test]
    fn missing_source_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("dst");
        let err = native()
            .run(&tmp.path().join("nope"), &dst, &mut io::sink())
            .unwrap_err();
        assert!(err.to_string().contains("Source directory not found"));
        assert!(!dst.exists());
    }

    #[test]
    fn empty_source_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("readme.txt"), "not markdown");

        let summary = native().run(&src, &dst, &mut io::sink()).unwrap();
        assert_eq!(summary, Summary::default());
        assert!(dst.is_dir());
        assert_eq!(fs::read_dir(&dst).unwrap().count(), 0);
    }

    #[test]
    fn images_are_copied_next_to_output() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("notes/pic.png"), "png");
        write(&src.join("notes/n.md"), "![Pic](pic.png)\n");

        native().run(&src, &dst, &mut io::sink()).unwrap();

        let images: Vec<_> = fs::read_dir(dst.join("notes/images"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(images.len(), 1);
        assert!(images[0].ends_with("_pic.png"));
        let org = fs::read_to_string(dst.join("notes/n.org")).unwrap();
        assert!(org.contains(&format!("[[file:images/{}][Pic]]", images[0])), "got {org}");
    }

    #[test]
    fn images_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("pic.png"), "png");
        write(&src.join("n.md"), "![Pic](pic.png)\n");

        let options = Options {
            images: false,
            ..Options::default()
        };
        Converter::new(Box::new(NativeEngine), options)
            .run(&src, &dst, &mut io::sink())
            .unwrap();
        assert!(!dst.join("images").exists());
        assert!(fs::read_to_string(dst.join("n.org"))
            .unwrap()
            .contains("[[pic.png]]"));
    }

    #[test]
    fn empty_backup_suffix_keeps_source_intact() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let text = "---\ntitle: T\n---\nbody\n";
        write(&src.join("note.md"), text);

        let options = Options {
            backup_suffix: String::new(),
            ..Options::default()
        };
        let summary = Converter::new(Box::new(NativeEngine), options)
            .run(&src, &dst, &mut io::sink())
            .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, vec![src.join("note.md")]);
        assert_eq!(fs::read_to_string(src.join("note.md")).unwrap(), text);
        assert!(!dst.join("note.org").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_notes_are_converted() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&tmp.path().join("elsewhere/real.md"), "# Linked\n");
        fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink("../elsewhere/real.md", src.join("link.md")).unwrap();

        let summary = native().run(&src, &dst, &mut io::sink()).unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            fs::read_to_string(dst.join("link.org")).unwrap(),
            ":PROPERTIES:\n:END:\n* Linked\n"
        );
    }

    #[test]
    fn destination_mirrors_source() {
        assert_eq!(
            destination_path(Path::new("/s"), Path::new("/d"), Path::new("/s/x/y.test.md")),
            PathBuf::from("/d/x/y.test.org")
        );
    }
}
