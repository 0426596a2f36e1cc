//! YAML front-matter extraction.

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde_yaml::{Mapping, Value};

lazy_static! {
    static ref FRONTMATTER_RE: Regex = Regex::new(r"(?s)\A---\s*\n(.*?)\n---\s*\n").unwrap();
}

/// Outcome of looking for a front-matter block at the start of a document.
#[derive(Debug, PartialEq)]
pub enum FrontMatter<'a> {
    /// The document does not start with a `---` block.
    Absent,
    /// A block was found and parsed as a mapping; `body` is the text after it.
    Parsed { data: Mapping, body: &'a str },
    /// A block was found but is not a usable mapping.
    Malformed(String),
}

pub fn parse(text: &str) -> FrontMatter<'_> {
    let Some(caps) = FRONTMATTER_RE.captures(text) else {
        return FrontMatter::Absent;
    };
    let whole = caps.get(0).map_or(0, |m| m.end());
    let yaml = caps.get(1).map_or("", |m| m.as_str());

    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(data)) => FrontMatter::Parsed {
            data,
            body: &text[whole..],
        },
        Ok(other) => FrontMatter::Malformed(format!(
            "expected a mapping, found {}",
            kind_of(&other)
        )),
        Err(e) => FrontMatter::Malformed(e.to_string()),
    }
}

/// Split `text` into its front-matter mapping and the remaining body.
///
/// Documents without a block, or with one that cannot be used, come back
/// whole with an empty mapping.
pub fn split(text: &str) -> (Mapping, &str) {
    match parse(text) {
        FrontMatter::Parsed { data, body } => (data, body),
        FrontMatter::Absent => (Mapping::new(), text),
        FrontMatter::Malformed(reason) => {
            warn!("Ignoring front-matter: {}", reason);
            (Mapping::new(), text)
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
