//! Batch face-embedding extraction.
//!
//! A run reads a CSV catalog of people and image references, reuses any
//! per-record artifact already on disk, extracts the rest on a dedicated
//! engine thread, then writes a combined archive and a manifest linking each
//! successful row to its embedding.

pub mod archive;
mod atomic;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod extractor;
pub mod manifest;
pub mod npy;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod store;

pub use cache::{CacheGate, CacheValidator, CacheVerdict, DimensionValidator, PresenceValidator};
pub use catalog::{Catalog, CatalogError, MalformedRecord, SourceRecord};
pub use config::{PipelineConfig, ReferenceMode};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use extractor::{Extraction, Extractor, SelectionPolicy};
pub use manifest::{ManifestError, ManifestOutcome, ManifestWriter};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use report::{Outcome, RecordEvent, RunReporter, RunSummary};
pub use resolve::{ResolvedTarget, Resolver};
pub use store::{ArchiveSummary, ArtifactStore, StoreError};
