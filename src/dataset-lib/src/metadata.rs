use crate::{DatasetError, DatasetResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Top level of a dotted metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Attributes of the dataset record itself, plus `dataset.metalog.*`.
    Dataset,
    /// Server-managed settings such as `server.deletion`.
    Server,
    /// Free-form keys visible to every user.
    Global,
    /// Free-form keys private to one user.
    User,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Dataset => "dataset",
            Namespace::Server => "server",
            Namespace::Global => "global",
            Namespace::User => "user",
        }
    }

    pub fn all() -> [Namespace; 4] {
        [
            Namespace::Dataset,
            Namespace::Server,
            Namespace::Global,
            Namespace::User,
        ]
    }
}

impl FromStr for Namespace {
    type Err = DatasetError;

    fn from_str(s: &str) -> DatasetResult<Self> {
        match s {
            "dataset" => Ok(Namespace::Dataset),
            "server" => Ok(Namespace::Server),
            "global" => Ok(Namespace::Global),
            "user" => Ok(Namespace::User),
            _ => Err(DatasetError::InvalidMetadataKey(s.to_string())),
        }
    }
}

/// A validated dotted metadata path, e.g. `dataset.metalog.pbench.script`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaKey {
    namespace: Namespace,
    path: Vec<String>,
}

impl MetaKey {
    pub fn parse(key: &str) -> DatasetResult<Self> {
        let mut segments = key.split('.');
        let namespace: Namespace = segments
            .next()
            .ok_or_else(|| DatasetError::InvalidMetadataKey(key.to_string()))?
            .parse()
            .map_err(|_| DatasetError::InvalidMetadataKey(key.to_string()))?;

        let mut path = Vec::new();
        for segment in segments {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(DatasetError::InvalidMetadataKey(key.to_string()));
            }
            path.push(segment.to_string());
        }

        Ok(Self { namespace, path })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Segments below the namespace.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn is_namespace_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn starts_with(&self, prefix: &MetaKey) -> bool {
        self.namespace == prefix.namespace && self.path.starts_with(&prefix.path)
    }

    /// Keys derived from the dataset record rather than stored.
    pub fn is_native(&self) -> bool {
        self.namespace == Namespace::Dataset
            && self
                .path
                .first()
                .map(|first| NATIVE_DATASET_KEYS.contains(&first.as_str()))
                .unwrap_or(false)
    }

    /// Keys a client may set through an ingest override or update request.
    pub fn is_writable(&self) -> bool {
        if self.path.is_empty() {
            return false;
        }
        match self.namespace {
            Namespace::Dataset => {
                matches!(self.path[0].as_str(), "access" | "metalog")
            }
            Namespace::Server => matches!(
                self.path[0].as_str(),
                "deletion" | "archiveonly" | "origin" | "benchmark"
            ),
            Namespace::Global | Namespace::User => true,
        }
    }
}

impl fmt::Display for MetaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace.as_str())?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for MetaKey {
    type Err = DatasetError;

    fn from_str(s: &str) -> DatasetResult<Self> {
        MetaKey::parse(s)
    }
}

pub const NATIVE_DATASET_KEYS: &[&str] = &[
    "name",
    "resource_id",
    "owner",
    "uploaded",
    "operations",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaType {
    Str,
    Bool,
    Int,
    Date,
    Map,
}

impl MetaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaType::Str => "str",
            MetaType::Bool => "bool",
            MetaType::Int => "int",
            MetaType::Date => "date",
            MetaType::Map => "map",
        }
    }
}

const SCHEMA: &[(&str, MetaType)] = &[
    ("dataset.name", MetaType::Str),
    ("dataset.resource_id", MetaType::Str),
    ("dataset.owner", MetaType::Str),
    ("dataset.access", MetaType::Str),
    ("dataset.uploaded", MetaType::Date),
    ("dataset.operations", MetaType::Map),
    ("dataset.metalog", MetaType::Map),
    ("server.deletion", MetaType::Date),
    ("server.archiveonly", MetaType::Bool),
    ("server.origin", MetaType::Str),
    ("server.benchmark", MetaType::Str),
    ("server.tarball-path", MetaType::Str),
];

/// Expected variant for a key, if the key is registered.
///
/// `dataset.metalog.<section>` is a mapping and every deeper leaf a string.
pub fn schema_type(key: &MetaKey) -> Option<MetaType> {
    let key_str = key.to_string();
    if let Some((_, t)) = SCHEMA.iter().find(|(k, _)| *k == key_str) {
        return Some(*t);
    }
    if key.namespace == Namespace::Dataset
        && key.path.first().map(|s| s.as_str()) == Some("metalog")
    {
        return match key.path.len() {
            2 => Some(MetaType::Map),
            n if n > 2 => Some(MetaType::Str),
            _ => None,
        };
    }
    None
}

pub const ACCESS_PUBLIC: &str = "public";
pub const ACCESS_PRIVATE: &str = "private";

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Date(DateTime<Utc>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn meta_type(&self) -> Option<MetaType> {
        match self {
            MetaValue::Null => None,
            MetaValue::Bool(_) => Some(MetaType::Bool),
            MetaValue::Int(_) => Some(MetaType::Int),
            MetaValue::Str(_) => Some(MetaType::Str),
            MetaValue::Date(_) => Some(MetaType::Date),
            MetaValue::Map(_) => Some(MetaType::Map),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Text form used by string comparisons; dates render as RFC 3339.
    pub fn to_text(&self) -> Option<String> {
        match self {
            MetaValue::Null | MetaValue::Map(_) => None,
            MetaValue::Bool(b) => Some(b.to_string()),
            MetaValue::Int(i) => Some(i.to_string()),
            MetaValue::Str(s) => Some(s.clone()),
            MetaValue::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetaValue::Null => Value::Null,
            MetaValue::Bool(b) => Value::Bool(*b),
            MetaValue::Int(i) => Value::from(*i),
            MetaValue::Str(s) => Value::String(s.clone()),
            MetaValue::Date(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            MetaValue::Map(m) => {
                let mut out = Map::new();
                for (k, v) in m {
                    out.insert(k.clone(), v.to_json());
                }
                Value::Object(out)
            }
        }
    }

    /// Untyped conversion: JSON strings stay strings.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Str(n.to_string()),
            },
            Value::String(s) => MetaValue::Str(s.clone()),
            Value::Array(items) => MetaValue::Str(
                items
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Value::Object(obj) => MetaValue::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), MetaValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert JSON stored under `key`, re-typing registered leaves
    /// (dates come back from storage as strings).
    pub fn from_json_typed(key: &MetaKey, value: &Value) -> Self {
        let untyped = MetaValue::from_json(value);
        retype(key, untyped)
    }
}

fn retype(key: &MetaKey, value: MetaValue) -> MetaValue {
    match value {
        MetaValue::Map(map) => MetaValue::Map(
            map.into_iter()
                .map(|(k, v)| {
                    let mut child = key.clone();
                    child.path.push(k.clone());
                    let v = retype(&child, v);
                    (k, v)
                })
                .collect(),
        ),
        MetaValue::Str(s) if schema_type(key) == Some(MetaType::Date) => match parse_date(&s) {
            Some(d) => MetaValue::Date(d),
            None => MetaValue::Str(s),
        },
        other => other,
    }
}

/// Check and coerce a client-supplied value against the schema registry.
pub fn validate_value(key: &MetaKey, value: MetaValue) -> DatasetResult<MetaValue> {
    let expected = match schema_type(key) {
        Some(t) => t,
        None => return Ok(value),
    };
    let invalid = |reason: String| DatasetError::InvalidMetadataValue {
        key: key.to_string(),
        reason,
    };

    match (expected, value) {
        (_, MetaValue::Null) => Ok(MetaValue::Null),
        (MetaType::Bool, MetaValue::Bool(b)) => Ok(MetaValue::Bool(b)),
        (MetaType::Bool, MetaValue::Str(s)) => parse_bool(&s)
            .map(MetaValue::Bool)
            .ok_or_else(|| invalid(format!("'{}' is not a boolean", s))),
        (MetaType::Date, MetaValue::Date(d)) => Ok(MetaValue::Date(d)),
        (MetaType::Date, MetaValue::Str(s)) => parse_date(&s)
            .map(MetaValue::Date)
            .ok_or_else(|| invalid(format!("'{}' is not a date", s))),
        (MetaType::Int, MetaValue::Int(i)) => Ok(MetaValue::Int(i)),
        (MetaType::Int, MetaValue::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(MetaValue::Int)
            .map_err(|_| invalid(format!("'{}' is not an integer", s))),
        (MetaType::Str, MetaValue::Str(s)) => {
            if key.to_string() == "dataset.access" && s != ACCESS_PUBLIC && s != ACCESS_PRIVATE {
                return Err(invalid(format!(
                    "access must be '{}' or '{}', not '{}'",
                    ACCESS_PUBLIC, ACCESS_PRIVATE, s
                )));
            }
            Ok(MetaValue::Str(s))
        }
        (MetaType::Map, MetaValue::Map(m)) => Ok(MetaValue::Map(m)),
        (expected, other) => Err(invalid(format!(
            "expected {}, got {}",
            expected.as_str(),
            other.meta_type().map(|t| t.as_str()).unwrap_or("null")
        ))),
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" => Some(true),
        "f" | "false" | "n" | "no" => Some(false),
        _ => None,
    }
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M%z",
    "%m/%d/%Y %H:%M:%S%z",
    "%m/%d/%Y %H:%M%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse the date spellings accepted by typed filters and date metadata.
/// Values without a zone are taken as UTC.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(d) = DateTime::parse_from_str(s, fmt) {
            return Some(d.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        }
    }
    None
}

/// The resolved metadata of one dataset: one nested mapping per namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    root: BTreeMap<String, MetaValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MetaKey) -> Option<&MetaValue> {
        let mut current = self.root.get(key.namespace.as_str())?;
        for segment in &key.path {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&MetaValue> {
        let key = MetaKey::parse(key).ok()?;
        self.get(&key)
    }

    /// Set a value, creating intermediate mappings. A non-mapping value in
    /// the way is replaced.
    pub fn set(&mut self, key: &MetaKey, value: MetaValue) {
        if key.path.is_empty() {
            self.root.insert(key.namespace.as_str().to_string(), value);
            return;
        }
        let mut current = self
            .root
            .entry(key.namespace.as_str().to_string())
            .or_insert_with(|| MetaValue::Map(BTreeMap::new()));
        let (last, parents) = match key.path.split_last() {
            Some(split) => split,
            None => return,
        };
        for segment in parents {
            if !matches!(current, MetaValue::Map(_)) {
                *current = MetaValue::Map(BTreeMap::new());
            }
            current = match current {
                MetaValue::Map(m) => m
                    .entry(segment.clone())
                    .or_insert_with(|| MetaValue::Map(BTreeMap::new())),
                _ => return,
            };
        }
        if !matches!(current, MetaValue::Map(_)) {
            *current = MetaValue::Map(BTreeMap::new());
        }
        if let MetaValue::Map(m) = current {
            m.insert(last.clone(), value);
        }
    }

    pub fn namespace(&self, namespace: Namespace) -> Option<&MetaValue> {
        self.root.get(namespace.as_str())
    }

    /// Project the requested keys; absent keys map to `Null`.
    pub fn select(&self, keys: &[MetaKey]) -> BTreeMap<String, MetaValue> {
        keys.iter()
            .map(|key| {
                (
                    key.to_string(),
                    self.get(key).cloned().unwrap_or(MetaValue::Null),
                )
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        MetaValue::Map(self.root.clone()).to_json()
    }
}
