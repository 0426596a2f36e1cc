use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the media directory created next to each converted file.
pub const IMAGES_DIR: &str = "images";

lazy_static! {
    /// `![alt](path "title")`
    static ref MARKDOWN_IMAGE_RE: Regex = Regex::new(
        r#"!\[(?P<alt>[^\]]*)\]\(\s*(?P<path><[^>]+>|[^)\s]+)(?:\s+(?:"[^"]*"|'[^']*'))?\s*\)"#
    )
    .unwrap();
    /// `<img src="path" alt="alt">`
    static ref HTML_IMAGE_RE: Regex = Regex::new(r"(?i)<img\b[^>]*>").unwrap();
    static ref HTML_SRC_RE: Regex =
        Regex::new(r#"(?i)\bsrc\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#).unwrap();
    static ref HTML_ALT_RE: Regex =
        Regex::new(r#"(?i)\balt\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#).unwrap();
    /// `[[path.png]]`, `![[path.png]]` or `[[path.png|alt]]`. Colons are excluded
    /// from the path so rewritten `[[file:...]]` links are not matched again.
    static ref WIKI_IMAGE_RE: Regex = Regex::new(
        r"(?i)!?\[\[(?P<path>[^\]\[|:]+?\.(?:png|jpe?g|gif|svg|webp|bmp|tiff?))(?:\|(?P<alt>[^\]]*))?\]\]"
    )
    .unwrap();
    static ref URL_SCHEME_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]+:").unwrap();
}

/// The syntaxes an image can be embedded with in a Markdown note.
#[derive(Copy, Clone, Debug)]
enum Syntax {
    Markdown,
    Html,
    Wiki,
}

impl Syntax {
    const ALL: [Syntax; 3] = [Syntax::Markdown, Syntax::Html, Syntax::Wiki];

    fn regex(self) -> &'static Regex {
        match self {
            Syntax::Markdown => &*MARKDOWN_IMAGE_RE,
            Syntax::Html => &*HTML_IMAGE_RE,
            Syntax::Wiki => &*WIKI_IMAGE_RE,
        }
    }

    /// Pull `(path, alt)` out of a match.
    fn reference(self, caps: &Captures) -> Option<(String, String)> {
        match self {
            Syntax::Markdown | Syntax::Wiki => {
                let path = caps.name("path")?.as_str();
                let path = path
                    .strip_prefix('<')
                    .and_then(|p| p.strip_suffix('>'))
                    .unwrap_or(path);
                let alt = caps.name("alt").map_or("", |m| m.as_str());
                Some((path.to_string(), alt.to_string()))
            }
            Syntax::Html => {
                let tag = caps.get(0)?.as_str();
                let path = attribute(&HTML_SRC_RE, tag)?;
                let alt = attribute(&HTML_ALT_RE, tag).unwrap_or_default();
                Some((path, alt))
            }
        }
    }
}

fn attribute(re: &Regex, tag: &str) -> Option<String> {
    let caps = re.captures(tag)?;
    caps.name("dq")
        .or_else(|| caps.name("sq"))
        .map(|m| m.as_str().to_string())
}

/// What happened to one image reference.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// The file was copied; the payload is the replacement Org link.
    Rewritten(String),
    /// The reference points somewhere other than the local filesystem.
    Remote,
    /// The referenced file does not exist.
    Missing(PathBuf),
}

/// Copies images referenced by one document and rewrites their links.
pub struct ImageRewriter {
    source_dir: PathBuf,
    dest_dir: PathBuf,
    image_dir: PathBuf,
}

impl ImageRewriter {
    /// Rewriter for the note at `source_doc` being converted to `dest_doc`.
    pub fn new(source_doc: &Path, dest_doc: &Path) -> Self {
        let source_dir = parent_dir(source_doc);
        let dest_dir = parent_dir(dest_doc);
        let image_dir = dest_dir.join(IMAGES_DIR);
        Self {
            source_dir,
            dest_dir,
            image_dir,
        }
    }

    /// Rewrite every image reference in `body`. Never fails: references that
    /// cannot be handled are left as they were.
    pub fn rewrite(&self, body: &str) -> String {
        let mut text = body.to_string();
        for syntax in Syntax::ALL {
            text = syntax
                .regex()
                .replace_all(&text, |caps: &Captures| self.replace(syntax, caps))
                .into_owned();
        }
        text
    }

    fn replace(&self, syntax: Syntax, caps: &Captures) -> String {
        let original = &caps[0];
        let Some((path, alt)) = syntax.reference(caps) else {
            debug!("No image path in '{}'", original);
            return original.to_string();
        };

        match self.rewrite_reference(&path, &alt) {
            Ok(Outcome::Rewritten(link)) => {
                debug!("Rewrote image '{}' to {}", path, link);
                link
            }
            Ok(Outcome::Remote) => {
                debug!("Leaving remote image '{}'", path);
                original.to_string()
            }
            Ok(Outcome::Missing(resolved)) => {
                warn!("Image not found: {}", resolved.display());
                original.to_string()
            }
            Err(e) => {
                warn!("Failed to process image '{}': {:#}", path, e);
                original.to_string()
            }
        }
    }

    /// Resolve, copy and link a single image reference.
    pub fn rewrite_reference(&self, raw_path: &str, alt: &str) -> Result<Outcome> {
        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .with_context(|| format!("Image path is not valid UTF-8: {}", raw_path))?;
        let Some(local) = local_path(&decoded) else {
            return Ok(Outcome::Remote);
        };

        let resolved = if local.is_absolute() {
            local
        } else {
            self.source_dir.join(local)
        };
        if !resolved.is_file() {
            return Ok(Outcome::Missing(resolved));
        }
        let source = fs::canonicalize(&resolved)
            .with_context(|| format!("Failed to resolve {}", resolved.display()))?;

        let dest = self.image_dir.join(hashed_name(&source));
        fs::create_dir_all(&self.image_dir).with_context(|| {
            format!(
                "Failed to create image directory: {}",
                self.image_dir.display()
            )
        })?;
        copy_with_mtime(&source, &dest)?;

        let target = dest.strip_prefix(&self.dest_dir).unwrap_or(&dest);
        Ok(Outcome::Rewritten(org_link(target, alt)))
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Filesystem path for a reference, or `None` for remote URLs.
fn local_path(reference: &str) -> Option<PathBuf> {
    let reference = reference.trim();
    if let Some(rest) = reference.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = reference.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if reference.starts_with("//") || URL_SCHEME_RE.is_match(reference) {
        return None;
    }
    Some(PathBuf::from(reference))
}

/// `{first 8 hex chars of sha256(path)}_{file name}`.
///
/// The hash covers the path string only, so a file replaced at the same
/// path keeps its name and identical files at different paths do not share one.
pub fn hashed_name(source: &Path) -> String {
    let digest = Sha256::digest(source.to_string_lossy().as_bytes());
    let hash = hex::encode(digest);
    let filename = source
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "image.bin".to_string());
    format!("{}_{}", &hash[..8], filename)
}

fn copy_with_mtime(source: &Path, dest: &Path) -> Result<()> {
    // `fs::copy` keeps the source permissions, so an earlier copy may be read-only.
    if dest.exists() {
        fs::remove_file(dest)
            .with_context(|| format!("Failed to replace {}", dest.display()))?;
    }
    fs::copy(source, dest).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    let modified = fs::metadata(source)?.modified()?;
    fs::File::open(dest)?
        .set_modified(modified)
        .with_context(|| format!("Failed to set modification time on {}", dest.display()))?;
    Ok(())
}

fn org_link(target: &Path, alt: &str) -> String {
    let target = target
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let alt = alt.trim().replace('[', "(").replace(']', ")");
    if alt.is_empty() {
        format!("[[file:{}]]", target)
    } else {
        format!("[[file:{}][{}]]", target, alt)
    }
}
