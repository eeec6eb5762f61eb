// Metadata filter expressions used by dataset listing.
//
// A filter list is a sequence of clauses `[^]key:[op]value[:type]`. Plain
// clauses are ANDed; a run of consecutive `^` clauses forms one OR group,
// which is ANDed with everything else.

use crate::metadata::{parse_bool, parse_date, MetaKey, MetaValue, Metadata};
use crate::{DatasetError, DatasetResult};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

pub const OR_MARKER: char = '^';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    fn is_relational(&self) -> bool {
        matches!(self, FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge)
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Ne => ordering != Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Le => ordering != Ordering::Greater,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Ge => ordering != Ordering::Less,
            FilterOp::Contains => false,
        }
    }

    /// Split a leading operator off a raw value.
    fn split_prefix(raw: &str) -> (FilterOp, &str) {
        const PREFIXES: &[(&str, FilterOp)] = &[
            ("<=", FilterOp::Le),
            (">=", FilterOp::Ge),
            ("!=", FilterOp::Ne),
            ("~", FilterOp::Contains),
            ("<", FilterOp::Lt),
            (">", FilterOp::Gt),
            ("=", FilterOp::Eq),
        ];
        for (prefix, op) in PREFIXES {
            if let Some(rest) = raw.strip_prefix(prefix) {
                return (*op, rest);
            }
        }
        (FilterOp::Eq, raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Date(DateTime<Utc>),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Str(s) => write!(f, "{}", s),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Int(i) => write!(f, "{}", i),
            FilterValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// One compiled comparison against a metadata key.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: MetaKey,
    pub op: FilterOp,
    pub value: FilterValue,
    pub case_insensitive: bool,
}

impl Clause {
    pub fn new(key: MetaKey, op: FilterOp, value: FilterValue) -> Self {
        Self {
            key,
            op,
            value,
            case_insensitive: false,
        }
    }

    /// Clauses built from the listing's named parameters (owner, access,
    /// name, start, end) compare strings without regard to case.
    pub fn friendly(key: MetaKey, op: FilterOp, value: FilterValue) -> Self {
        Self {
            key,
            op,
            value,
            case_insensitive: true,
        }
    }

    /// Parse `key:[op]value[:type]`; the OR marker must already be removed.
    pub fn parse(text: &str) -> DatasetResult<Self> {
        let (key_str, rest) = text
            .split_once(':')
            .ok_or_else(|| DatasetError::invalid_filter(text, "expected key:value"))?;
        if key_str.is_empty() {
            return Err(DatasetError::invalid_filter(text, "missing key"));
        }
        let key = MetaKey::parse(key_str)
            .map_err(|_| DatasetError::invalid_filter(text, format!("bad key '{}'", key_str)))?;

        let (op, rest) = FilterOp::split_prefix(rest);
        let (raw_value, type_name) = split_value(text, rest)?;
        let value = coerce(text, op, &raw_value, type_name.as_deref())?;

        Ok(Self::new(key, op, value))
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        let actual = match metadata.get(&self.key) {
            Some(MetaValue::Null) | None => return self.op == FilterOp::Ne,
            Some(v) => v,
        };

        match &self.value {
            FilterValue::Str(expected) => {
                let text = match actual.to_text() {
                    Some(t) => t,
                    None => return false,
                };
                let (text, expected) = if self.case_insensitive {
                    (text.to_lowercase(), expected.to_lowercase())
                } else {
                    (text, expected.clone())
                };
                match self.op {
                    FilterOp::Contains => text.contains(expected.as_str()),
                    op => op.accepts(text.as_str().cmp(expected.as_str())),
                }
            }
            FilterValue::Bool(expected) => {
                let actual = match actual {
                    MetaValue::Bool(b) => Some(*b),
                    MetaValue::Str(s) => parse_bool(s),
                    _ => None,
                };
                match actual {
                    Some(b) => self.op.accepts(b.cmp(expected)),
                    None => false,
                }
            }
            FilterValue::Int(expected) => {
                let actual = match actual {
                    MetaValue::Int(i) => Some(*i),
                    MetaValue::Str(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                match actual {
                    Some(i) => self.op.accepts(i.cmp(expected)),
                    None => false,
                }
            }
            FilterValue::Date(expected) => {
                let actual = match actual {
                    MetaValue::Date(d) => Some(*d),
                    MetaValue::Str(s) => parse_date(s),
                    _ => None,
                };
                match actual {
                    Some(d) => self.op.accepts(d.cmp(expected)),
                    None => false,
                }
            }
        }
    }
}

fn split_value(text: &str, rest: &str) -> DatasetResult<(String, Option<String>)> {
    let mut chars = rest.chars();
    match chars.next() {
        Some(quote @ ('\'' | '"')) => {
            let body = &rest[1..];
            let end = body
                .find(quote)
                .ok_or_else(|| DatasetError::invalid_filter(text, "unterminated quote"))?;
            let value = body[..end].to_string();
            let tail = &body[end + 1..];
            if tail.is_empty() {
                Ok((value, None))
            } else if let Some(type_name) = tail.strip_prefix(':') {
                Ok((value, Some(type_name.to_string())))
            } else {
                Err(DatasetError::invalid_filter(
                    text,
                    "unexpected text after quoted value",
                ))
            }
        }
        _ => {
            let mut parts = rest.split(':');
            let value = parts.next().unwrap_or_default().to_string();
            let type_name = parts.next().map(|s| s.to_string());
            if parts.next().is_some() {
                return Err(DatasetError::invalid_filter(
                    text,
                    "values containing ':' must be quoted",
                ));
            }
            Ok((value, type_name))
        }
    }
}

fn coerce(text: &str, op: FilterOp, raw: &str, type_name: Option<&str>) -> DatasetResult<FilterValue> {
    let type_name = type_name.unwrap_or("str").to_ascii_lowercase();
    let value = match type_name.as_str() {
        "str" | "string" => FilterValue::Str(raw.to_string()),
        "bool" => FilterValue::Bool(parse_bool(raw).ok_or_else(|| {
            DatasetError::invalid_filter(text, format!("'{}' is not a boolean", raw))
        })?),
        "int" => FilterValue::Int(raw.trim().parse::<i64>().map_err(|_| {
            DatasetError::invalid_filter(text, format!("'{}' is not an integer", raw))
        })?),
        "date" => FilterValue::Date(parse_date(raw).ok_or_else(|| {
            DatasetError::invalid_filter(text, format!("'{}' is not a date", raw))
        })?),
        other => {
            return Err(DatasetError::invalid_filter(
                text,
                format!("unknown type '{}'", other),
            ))
        }
    };

    match (&value, op) {
        (FilterValue::Str(_), _) => {}
        (_, FilterOp::Contains) => {
            return Err(DatasetError::invalid_filter(
                text,
                "'~' applies only to string values",
            ))
        }
        (FilterValue::Bool(_), op) if op.is_relational() => {
            return Err(DatasetError::invalid_filter(
                text,
                "boolean values support only equality",
            ))
        }
        _ => {}
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    All(Clause),
    Any(Vec<Clause>),
}

impl Term {
    fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Term::All(clause) => clause.matches(metadata),
            Term::Any(clauses) => clauses.iter().any(|c| c.matches(metadata)),
        }
    }
}

/// A compiled filter list. Compilation validates every clause, so a bad
/// clause rejects the whole request before any dataset is examined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile<S: AsRef<str>>(clauses: &[S]) -> DatasetResult<Self> {
        let mut terms = Vec::new();
        let mut group: Vec<Clause> = Vec::new();

        for raw in clauses {
            let raw = raw.as_ref().trim();
            match raw.strip_prefix(OR_MARKER) {
                Some(body) => group.push(Clause::parse(body)?),
                None => {
                    if !group.is_empty() {
                        terms.push(Term::Any(std::mem::take(&mut group)));
                    }
                    terms.push(Term::All(Clause::parse(raw)?));
                }
            }
        }
        if !group.is_empty() {
            terms.push(Term::Any(group));
        }

        Ok(Self { terms })
    }

    /// AND one more clause onto the filter.
    pub fn and(mut self, clause: Clause) -> Self {
        self.terms.push(Term::All(clause));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.terms.iter().all(|term| term.matches(metadata))
    }

    /// Number of OR groups; mainly for diagnostics.
    pub fn or_groups(&self) -> usize {
        self.terms
            .iter()
            .filter(|t| matches!(t, Term::Any(_)))
            .count()
    }
}
