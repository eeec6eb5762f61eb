use chrono::{DateTime, Utc};
use dataset_lib::*;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    ResourceId,
}

/// One listing request. `filter` holds raw filter clauses, `metadata` the
/// keys to project for each match, and the remaining fields are the
/// friendly parameters.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: Vec<String>,
    pub metadata: Vec<String>,
    pub owner: Option<String>,
    pub access: Option<String>,
    pub name: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Authenticated caller; `None` lists public datasets only.
    pub user: Option<String>,
    pub sort: SortKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListEntry {
    pub resource_id: String,
    pub name: String,
    #[serde(serialize_with = "serialize_projection")]
    pub metadata: BTreeMap<String, MetaValue>,
}

fn serialize_projection<S: serde::Serializer>(
    metadata: &BTreeMap<String, MetaValue>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(metadata.len()))?;
    for (key, value) in metadata {
        map.serialize_entry(key, &value.to_json())?;
    }
    map.end()
}

/// Compiled form of a `ListQuery`, built once per request.
#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    pub filter: Filter,
    pub keys: Vec<MetaKey>,
    pub user: Option<String>,
}

impl CompiledQuery {
    pub fn compile(query: &ListQuery) -> DatasetResult<Self> {
        let mut filter = Filter::compile(&query.filter)?;

        if let Some(owner) = &query.owner {
            filter = filter.and(Clause::friendly(
                MetaKey::parse("dataset.owner")?,
                FilterOp::Eq,
                FilterValue::Str(owner.clone()),
            ));
        }
        if let Some(access) = &query.access {
            filter = filter.and(Clause::friendly(
                MetaKey::parse("dataset.access")?,
                FilterOp::Eq,
                FilterValue::Str(access.clone()),
            ));
        }
        if let Some(name) = &query.name {
            filter = filter.and(Clause::friendly(
                MetaKey::parse("dataset.name")?,
                FilterOp::Contains,
                FilterValue::Str(name.clone()),
            ));
        }
        if let Some(start) = query.start {
            filter = filter.and(Clause::friendly(
                MetaKey::parse("dataset.uploaded")?,
                FilterOp::Ge,
                FilterValue::Date(start),
            ));
        }
        if let Some(end) = query.end {
            filter = filter.and(Clause::friendly(
                MetaKey::parse("dataset.uploaded")?,
                FilterOp::Le,
                FilterValue::Date(end),
            ));
        }

        let keys = query
            .metadata
            .iter()
            .map(|k| MetaKey::parse(k.trim()))
            .collect::<DatasetResult<Vec<_>>>()?;

        Ok(Self {
            filter,
            keys,
            user: query.user.clone(),
        })
    }

    /// Public datasets are visible to everyone, private ones to their owner.
    pub fn visible(&self, record: &DatasetRecord) -> bool {
        record.access == ACCESS_PUBLIC
            || self.user.as_deref() == Some(record.owner.as_str())
    }
}

pub(crate) fn sort_entries(entries: &mut [ListEntry], sort: SortKey) {
    match sort {
        SortKey::Name => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        SortKey::ResourceId => entries.sort_by(|a, b| a.resource_id.cmp(&b.resource_id)),
    }
}
