use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::warn;
use serde_yaml::Value;

/// Layout used when a date is written into the properties drawer.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single front-matter value after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Scalar(String),
    Date(NaiveDateTime),
    List(Vec<MetaValue>),
    /// Mappings and anything else without a scalar form.
    Nested(Value),
}

impl MetaValue {
    pub fn from_yaml(value: &Value) -> Self {
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Scalar(b.to_string()),
            Value::Number(n) => MetaValue::Scalar(n.to_string()),
            Value::String(s) => MetaValue::Scalar(s.clone()),
            Value::Sequence(items) => MetaValue::List(items.iter().map(Self::from_yaml).collect()),
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
            Value::Mapping(_) => MetaValue::Nested(value.clone()),
        }
    }
}

/// Ordered document metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: Vec<(String, MetaValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Copy, Clone)]
enum FieldKind {
    Plain,
    Date,
    List,
}

/// Keys every normalized document carries, in output order.
const DEFAULT_FIELDS: [(&str, FieldKind); 5] = [
    ("title", FieldKind::Plain),
    ("created", FieldKind::Date),
    ("modified", FieldKind::Date),
    ("type", FieldKind::Plain),
    ("tags", FieldKind::List),
];

/// Fill in the default keys from raw front-matter, dropping anything else.
pub fn normalize(raw: &Value) -> Metadata {
    let mapping = match raw {
        Value::Mapping(m) => Some(m),
        Value::Null => None,
        other => {
            warn!("Front-matter is not a mapping, ignoring: {:?}", other);
            None
        }
    };

    let mut metadata = Metadata::new();
    for (key, kind) in DEFAULT_FIELDS {
        let supplied = mapping.and_then(|m| m.get(key)).map(MetaValue::from_yaml);
        let value = match (kind, supplied) {
            (FieldKind::List, None) => MetaValue::List(Vec::new()),
            (_, None) => MetaValue::Null,
            (FieldKind::List, Some(v)) => into_list(v),
            (FieldKind::Date, Some(v)) => into_date(v),
            (FieldKind::Plain, Some(v)) => v,
        };
        metadata.insert(key, value);
    }
    metadata
}

fn into_list(value: MetaValue) -> MetaValue {
    match value {
        MetaValue::List(_) => value,
        MetaValue::Null => MetaValue::List(Vec::new()),
        MetaValue::Scalar(ref s) if s.is_empty() => MetaValue::List(Vec::new()),
        other => MetaValue::List(vec![other]),
    }
}

fn into_date(value: MetaValue) -> MetaValue {
    match value {
        MetaValue::Scalar(s) => match parse_date(&s) {
            Some(date) => MetaValue::Date(date),
            None => MetaValue::Scalar(s),
        },
        other => other,
    }
}

fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Render metadata as an Org properties drawer, ending in a newline.
pub fn format_properties(metadata: &Metadata) -> String {
    let mut lines = vec![":PROPERTIES:".to_string()];

    for (key, value) in metadata.iter() {
        match format_field(key, value) {
            Ok(Some(line)) => lines.push(line),
            Ok(None) => {}
            Err(e) => warn!("Skipping property '{}': {:#}", key, e),
        }
    }

    lines.push(":END:".to_string());
    lines.join("\n") + "\n"
}

fn format_field(key: &str, value: &MetaValue) -> Result<Option<String>> {
    if *value == MetaValue::Null {
        return Ok(None);
    }

    let key = key.trim().to_uppercase().replace(' ', "_");
    if key.contains(':') {
        bail!("property names cannot contain ':'");
    }
    // Drawer values must stay on one line.
    let rendered = render_value(value)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if key.is_empty() || rendered.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!(":{}: {}", key, rendered)))
}

fn render_value(value: &MetaValue) -> Result<String> {
    Ok(match value {
        MetaValue::Null => String::new(),
        MetaValue::Scalar(s) => s.clone(),
        MetaValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        MetaValue::List(items) => items
            .iter()
            .filter(|item| **item != MetaValue::Null)
            .map(render_value)
            .collect::<Result<Vec<_>>>()?
            .join(" "),
        MetaValue::Nested(v) => {
            serde_yaml::to_string(v).context("Failed to render nested value")?
        }
    })
}
