//! Persistence boundary for the enrichment pipeline.
//!
//! The pipeline never talks to a database directly; it goes through
//! [`EnrichmentStore`] so the batch loop can be tested against the
//! in-memory implementation and wired to whatever backend owns the
//! plots table.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use plot_enrich_models::{EnrichmentDocument, GeoPoint};

use crate::EnrichError;

/// One row of the plots table: a stable id and the point to resolve.
#[derive(Debug, Clone)]
pub struct PlotRow {
    pub id: i64,
    pub point: GeoPoint,
}

#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    /// Fetches the next batch of plots starting at `offset`, in a stable
    /// order. An empty batch means the table is exhausted.
    async fn fetch_batch(&self, offset: u64, limit: u64) -> Result<Vec<PlotRow>, EnrichError>;

    /// Returns the current enrichment document for each of `ids` that has
    /// one. Plots with no document yet are simply absent from the map.
    async fn existing_enrichment(
        &self,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, EnrichmentDocument>, EnrichError>;

    /// Writes the merged document back for one plot.
    async fn upsert_enrichment(
        &self,
        id: i64,
        document: &EnrichmentDocument,
    ) -> Result<(), EnrichError>;
}

/// In-memory store used by the pipeline tests and the dry-run CLI path.
pub struct MemoryStore {
    rows: Vec<PlotRow>,
    documents: Mutex<BTreeMap<i64, EnrichmentDocument>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(rows: Vec<PlotRow>) -> Self {
        Self {
            rows,
            documents: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seeds an existing document for a plot, as if a previous producer
    /// had already written to it.
    ///
    /// # Panics
    ///
    /// * If the documents lock is poisoned.
    pub fn seed_document(&self, id: i64, document: EnrichmentDocument) {
        self.documents.lock().unwrap().insert(id, document);
    }

    /// # Panics
    ///
    /// * If the documents lock is poisoned.
    #[must_use]
    pub fn document(&self, id: i64) -> Option<EnrichmentDocument> {
        self.documents.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl EnrichmentStore for MemoryStore {
    async fn fetch_batch(&self, offset: u64, limit: u64) -> Result<Vec<PlotRow>, EnrichError> {
        let offset = usize::try_from(offset).map_err(|e| EnrichError::storage(e.to_string()))?;
        let limit = usize::try_from(limit).map_err(|e| EnrichError::storage(e.to_string()))?;
        Ok(self
            .rows
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn existing_enrichment(
        &self,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, EnrichmentDocument>, EnrichError> {
        let documents = self
            .documents
            .lock()
            .map_err(|e| EnrichError::storage(e.to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(id).map(|doc| (*id, doc.clone())))
            .collect())
    }

    async fn upsert_enrichment(
        &self,
        id: i64,
        document: &EnrichmentDocument,
    ) -> Result<(), EnrichError> {
        self.documents
            .lock()
            .map_err(|e| EnrichError::storage(e.to_string()))?
            .insert(id, document.clone());
        Ok(())
    }
}
