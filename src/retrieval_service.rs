//! Similarity search joined against food metadata.
//!
//! The service owns nothing mutable: the index is shared behind an `Arc` and
//! the metadata store synchronizes itself, so one instance can serve
//! concurrent callers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::metadata_store::{FoodRecord, MetadataStore, SqliteMetadataStore};
use crate::search::{Content, EmbeddingStore, Encoder, NeighborSearch, VectorIndex};

/// A metadata record paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedFood {
    pub record: FoodRecord,
    pub score: f32,
}

pub struct RetrievalService<I: NeighborSearch + ?Sized, M: MetadataStore> {
    index: Arc<I>,
    metadata: M,
}

impl<I: NeighborSearch + ?Sized, M: MetadataStore> RetrievalService<I, M> {
    pub fn new(index: Arc<I>, metadata: M) -> Self {
        Self { index, metadata }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Top-`k` foods for `query`, most similar first. Hits without a
    /// metadata row are dropped; the rest keep their similarity order.
    pub fn retrieve_detailed(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedFood>> {
        let neighbors = self.index.search(query, k)?;
        let ids: Vec<i64> = neighbors.iter().map(|n| n.id).collect();

        let mut found = match self.metadata.get_many(&ids) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, requested = ids.len(), "Metadata lookup failed, continuing without context");
                Default::default()
            }
        };

        let foods: Vec<RetrievedFood> = neighbors
            .iter()
            .filter_map(|n| {
                found.remove(&n.id).map(|record| RetrievedFood {
                    record,
                    score: n.score,
                })
            })
            .collect();

        debug!(hits = neighbors.len(), joined = foods.len(), "Retrieved reference foods");
        Ok(foods)
    }

    /// Formatted grounding lines for the top-`k` foods, most similar first.
    pub fn retrieve(&self, query: &[f32], k: usize) -> Result<Vec<String>> {
        Ok(self
            .retrieve_detailed(query, k)?
            .iter()
            .map(|food| food.record.context_line())
            .collect())
    }

    /// Encodes `content` and retrieves against it. Encoder failures abort
    /// before the index is consulted.
    pub fn retrieve_content(
        &self,
        encoder: &dyn Encoder,
        content: Content<'_>,
        k: usize,
    ) -> Result<Vec<String>> {
        let query = encoder.encode(content)?;
        self.retrieve(&query, k)
    }
}

impl RetrievalService<VectorIndex, SqliteMetadataStore> {
    /// Opens the on-disk index and metadata database named in `settings`.
    ///
    /// With `retrieval.rebuild_on_load_failure` set, an unreadable index is
    /// rebuilt from the embedding store first.
    pub fn open(settings: &Settings) -> Result<Self> {
        let paths = &settings.paths;
        let loaded = if settings.retrieval.rebuild_on_load_failure {
            VectorIndex::load_or_rebuild(&paths.index, &EmbeddingStore::new(&paths.embedding_store))
        } else {
            VectorIndex::load(&paths.index)
        };
        let index = loaded.map_err(|e| {
            warn!(path = %paths.index.display(), error = %e, "Vector index unavailable");
            e
        })?;

        let metadata = SqliteMetadataStore::open(&paths.metadata_db)?;
        if metadata.count()? == 0 {
            warn!(path = %paths.metadata_db.display(), "Metadata table is empty; run import-metadata first");
        }

        let service = Self::new(Arc::new(index), metadata);
        info!(
            vectors = service.index().len(),
            dimension = service.index().dimension(),
            "Retrieval service ready"
        );
        Ok(service)
    }
}
