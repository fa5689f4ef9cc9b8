//! Per-outcome counters and the ordered event log.

use crate::catalog::MalformedRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single classification each catalog row ends up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Fresh embedding persisted this run.
    Extracted,
    /// Existing artifact reused.
    Cached,
    NotFound,
    NoFace,
    Malformed,
    DecodeError,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Extracted | Outcome::Cached)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    /// Fresh plus cached.
    pub successful: usize,
    pub skipped_cached: usize,
    pub not_found: usize,
    pub no_face: usize,
    pub malformed: usize,
    pub decode_error: usize,
    /// Cached artifacts that failed to load and were recomputed.
    /// Not a primary outcome.
    pub corrupt_artifacts: usize,
}

impl RunSummary {
    pub fn is_conserved(&self) -> bool {
        let accounted =
            self.successful + self.not_found + self.no_face + self.malformed + self.decode_error;
        self.total == accounted && self.skipped_cached <= self.successful
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processing summary:")?;
        writeln!(f, "  total records:         {}", self.total)?;
        writeln!(f, "  successful embeddings: {}", self.successful)?;
        writeln!(f, "    reused from cache:   {}", self.skipped_cached)?;
        writeln!(f, "  images not found:      {}", self.not_found)?;
        writeln!(f, "  no face detected:      {}", self.no_face)?;
        writeln!(f, "  malformed rows:        {}", self.malformed)?;
        write!(f, "  decode errors:         {}", self.decode_error)?;
        if self.corrupt_artifacts > 0 {
            write!(f, "\n  corrupt cache entries: {} (recomputed)", self.corrupt_artifacts)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordEvent {
    /// Catalog line of the row.
    pub line: u64,
    /// Absent for malformed rows, which never resolve.
    pub artifact_key: Option<String>,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl RecordEvent {
    pub fn new(line: u64, artifact_key: &str, outcome: Outcome) -> Self {
        Self {
            line,
            artifact_key: Some(artifact_key.to_string()),
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn malformed(record: &MalformedRecord) -> Self {
        Self {
            line: record.line,
            artifact_key: None,
            outcome: Outcome::Malformed,
            detail: Some(record.reason.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReporter {
    summary: RunSummary,
    events: Vec<RecordEvent>,
}

impl RunReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one row's outcome. Call exactly once per catalog row.
    pub fn record(&mut self, event: RecordEvent) {
        let s = &mut self.summary;
        s.total += 1;
        match event.outcome {
            Outcome::Extracted => s.successful += 1,
            Outcome::Cached => {
                s.successful += 1;
                s.skipped_cached += 1;
            }
            Outcome::NotFound => s.not_found += 1,
            Outcome::NoFace => s.no_face += 1,
            Outcome::Malformed => s.malformed += 1,
            Outcome::DecodeError => s.decode_error += 1,
        }

        let key = event.artifact_key.as_deref().unwrap_or("-");
        let detail = event.detail.as_deref().unwrap_or("");
        if event.outcome.is_success() {
            tracing::info!(line = event.line, key, outcome = ?event.outcome, "record done");
        } else {
            tracing::warn!(
                line = event.line,
                key,
                outcome = ?event.outcome,
                detail,
                "record skipped"
            );
        }

        self.events.push(event);
    }

    pub fn note_corrupt_artifact(&mut self) {
        self.summary.corrupt_artifacts += 1;
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn finish(self) -> (RunSummary, Vec<RecordEvent>) {
        (self.summary, self.events)
    }
}
