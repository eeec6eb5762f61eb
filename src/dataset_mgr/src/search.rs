use async_trait::async_trait;
use dataset_lib::DatasetResult;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata projection of one dataset handed to the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub resource_id: String,
    pub name: String,
    pub controller: String,
    pub metadata: Value,
}

/// The external search/indexing backend. Only document hand-off lives here;
/// the backend's query language does not.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn index(&self, doc: SearchDocument) -> DatasetResult<()>;
    async fn remove(&self, resource_id: &str) -> DatasetResult<()>;
}

/// Used when no search backend is configured.
#[derive(Debug, Default, Clone)]
pub struct NullIndexer;

#[async_trait]
impl SearchIndexer for NullIndexer {
    async fn index(&self, doc: SearchDocument) -> DatasetResult<()> {
        debug!("NullIndexer: drop document for {} ({})", doc.name, doc.resource_id);
        Ok(())
    }

    async fn remove(&self, resource_id: &str) -> DatasetResult<()> {
        debug!("NullIndexer: nothing to remove for {}", resource_id);
        Ok(())
    }
}
