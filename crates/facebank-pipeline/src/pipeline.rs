//! One extraction run: catalog in; artifacts, archive and manifest out.

use crate::cache::{CacheGate, CacheValidator, CacheVerdict, DimensionValidator, PresenceValidator};
use crate::catalog::{Catalog, CatalogError, SourceRecord};
use crate::config::{PipelineConfig, ReferenceMode};
use crate::engine::{EngineError, EngineHandle};
use crate::extractor::Extraction;
use crate::manifest::{EmbeddingRef, ManifestEntry, ManifestError, ManifestOutcome, ManifestWriter};
use crate::report::{Outcome, RecordEvent, RunReporter, RunSummary};
use crate::resolve::{ResolvedTarget, Resolver};
use crate::store::{ArchiveSummary, ArtifactStore, StoreError};
use chrono::{DateTime, Utc};
use facebank_core::Embedding;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Run-aborting failures, one variant per phase.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("catalog phase: {0}")]
    Catalog(#[from] CatalogError),
    #[error("setup phase: cannot create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact phase: cannot persist {key}: {source}")]
    Persist {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("archive phase: {0}")]
    Archive(#[source] StoreError),
    #[error("manifest phase: {0}")]
    Manifest(#[from] ManifestError),
    #[error("extraction phase: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub events: Vec<RecordEvent>,
    pub manifest: ManifestOutcome,
    pub archive: Option<ArchiveSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What processing one resolved record produced.
struct Processed {
    outcome: Outcome,
    embedding: Option<Embedding>,
    detail: Option<String>,
}

impl Processed {
    fn success(outcome: Outcome, embedding: Embedding) -> Self {
        Self { outcome, embedding: Some(embedding), detail: None }
    }

    fn failure(outcome: Outcome, detail: Option<String>) -> Self {
        Self { outcome, embedding: None, detail }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    resolver: Resolver,
    gate: CacheGate,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let validator: Box<dyn CacheValidator> = if config.validate_cache {
            Box::new(DimensionValidator { dim: config.embedding_dim })
        } else {
            Box::new(PresenceValidator)
        };
        Self {
            resolver: Resolver::new(&config.image_dir, &config.artifact_dir),
            gate: CacheGate::new(validator).forced(config.force),
            config,
        }
    }

    /// Replace the cache validation strategy.
    pub fn with_validator(mut self, validator: Box<dyn CacheValidator>) -> Self {
        self.gate = CacheGate::new(validator).forced(self.config.force);
        self
    }

    /// Create every directory the run writes into.
    pub fn prepare_directories(&self) -> Result<(), PipelineError> {
        let parents = [&self.config.manifest_path, &self.config.archive_path]
            .into_iter()
            .filter_map(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty());

        for dir in [self.config.image_dir.as_path(), self.config.artifact_dir.as_path()]
            .into_iter()
            .chain(parents)
        {
            std::fs::create_dir_all(dir).map_err(|source| PipelineError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Process the whole catalog, in order, then flush archive and manifest.
    pub async fn run(&self, engine: &EngineHandle) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        self.prepare_directories()?;
        let catalog = Catalog::open(&self.config.catalog_path)?;

        tracing::info!(
            catalog = %self.config.catalog_path.display(),
            images = %self.config.image_dir.display(),
            mode = %self.config.reference_mode,
            force = self.config.force,
            "extraction run starting"
        );

        let mut store = ArtifactStore::new(self.config.embedding_dim);
        let mut manifest = ManifestWriter::new(self.config.reference_mode);
        let mut reporter = RunReporter::new();
        let mut first_line_for_key: HashMap<String, u64> = HashMap::new();

        for row in catalog.rows() {
            let record = match row {
                Ok(record) => record,
                Err(malformed) => {
                    reporter.record(RecordEvent::malformed(&malformed));
                    continue;
                }
            };

            let target = self.resolver.resolve(&record);
            let first = *first_line_for_key
                .entry(target.artifact_key.clone())
                .or_insert(record.line);
            if first != record.line {
                tracing::warn!(
                    key = %target.artifact_key,
                    first_line = first,
                    line = record.line,
                    "records share an artifact key; later row reuses the earlier artifact"
                );
            }

            // A key settled earlier in this run is reused as-is, even when forced.
            let earlier = (first != record.line)
                .then(|| store.get(&target.artifact_key).cloned())
                .flatten();
            let processed = match earlier {
                Some(embedding) => Processed::success(Outcome::Cached, embedding),
                None => self.process(&target, engine, &mut store, &mut reporter).await?,
            };

            if let Some(embedding) = processed.embedding {
                manifest.push(self.manifest_entry(&record, &target, embedding))?;
            }

            let mut event = RecordEvent::new(record.line, &target.artifact_key, processed.outcome);
            if let Some(detail) = processed.detail {
                event = event.with_detail(detail);
            }
            reporter.record(event);
        }

        let archive = store
            .flush_archive(&self.config.archive_path)
            .map_err(PipelineError::Archive)?;
        let manifest = manifest.write(&self.config.manifest_path)?;

        let (summary, events) = reporter.finish();
        debug_assert!(summary.is_conserved(), "{summary:?}");
        tracing::info!(
            total = summary.total,
            successful = summary.successful,
            cached = summary.skipped_cached,
            "extraction run finished"
        );

        Ok(RunReport {
            summary,
            events,
            manifest,
            archive,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Resolve one record to an outcome: reuse its artifact or extract anew.
    async fn process(
        &self,
        target: &ResolvedTarget,
        engine: &EngineHandle,
        store: &mut ArtifactStore,
        reporter: &mut RunReporter,
    ) -> Result<Processed, PipelineError> {
        let key = target.artifact_key.as_str();

        match self.gate.check(target) {
            CacheVerdict::Hit => match store.load(key, &target.artifact_path) {
                Ok(embedding) => return Ok(Processed::success(Outcome::Cached, embedding)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "cached artifact unusable; recomputing");
                    reporter.note_corrupt_artifact();
                }
            },
            CacheVerdict::Invalid(reason) => {
                tracing::warn!(key, reason = %reason, "cached artifact rejected; recomputing");
            }
            CacheVerdict::Miss => {}
        }

        let extraction = engine
            .extract_within(target.image_path.clone(), self.config.record_timeout())
            .await?;

        Ok(match extraction {
            Extraction::Embedded(embedding) => {
                match store.persist(key, &target.artifact_path, &embedding) {
                    Ok(_) => Processed::success(Outcome::Extracted, embedding),
                    Err(StoreError::DimensionMismatch { expected, actual }) => Processed::failure(
                        Outcome::DecodeError,
                        Some(format!("{actual}-dim embedding, expected {expected}")),
                    ),
                    Err(source) => {
                        return Err(PipelineError::Persist { key: key.to_string(), source });
                    }
                }
            }
            Extraction::NotFound => Processed::failure(
                Outcome::NotFound,
                Some(format!("no image at {}", target.image_path.display())),
            ),
            Extraction::NoFace => Processed::failure(Outcome::NoFace, None),
            Extraction::DecodeFailed(reason) => {
                Processed::failure(Outcome::DecodeError, Some(reason))
            }
        })
    }

    fn manifest_entry(
        &self,
        record: &SourceRecord,
        target: &ResolvedTarget,
        embedding: Embedding,
    ) -> ManifestEntry {
        let embedding = match self.config.reference_mode {
            ReferenceMode::Inline => EmbeddingRef::Inline(embedding.values),
            ReferenceMode::Path => EmbeddingRef::Path(target.artifact_path.clone()),
        };
        ManifestEntry {
            serial: record.serial.clone(),
            display_name: record.display_name.clone(),
            person_id: record.person_id.clone(),
            image_ref: record.image_ref.clone(),
            embedding,
        }
    }
}

