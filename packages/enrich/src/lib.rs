#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The enrichment pipeline: per-point resolution, non-destructive document
//! merging, and the batch orchestrator that drives both against a store.

pub mod merge;
pub mod orchestrator;
pub mod resolve;
pub mod store;
pub mod translate;

use plot_enrich_models::CoordinateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("merging category '{category}' would drop existing key '{key}'")]
    MergeDataLoss { category: String, key: String },
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
}

impl EnrichError {
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

pub use merge::merge_category;
pub use orchestrator::{BatchOutcome, OrchestratorConfig, RunState, run};
pub use resolve::{PointResolver, Resolver};
pub use store::{EnrichmentStore, MemoryStore, PlotRow};
pub use translate::{LabelTranslator, NoopTranslator};
