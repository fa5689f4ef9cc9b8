//! Reads the CSV catalog into [`SourceRecord`]s.
//!
//! Row arity is checked here rather than by the CSV parser, so one bad row is
//! reported as a [`MalformedRecord`] and the rest of the catalog still loads.

use crate::resolve;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `serial, display_name, person_id, image_ref`
pub const CATALOG_COLUMNS: usize = 4;

/// One catalog row, as loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// 1-based line in the catalog file.
    pub line: u64,
    pub serial: String,
    pub display_name: String,
    pub person_id: String,
    /// Image reference with `\` normalized to `/`.
    pub image_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("catalog line {line}: {reason}")]
pub struct MalformedRecord {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot open catalog {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A catalog positioned after its header row.
pub struct Catalog<R> {
    reader: csv::Reader<R>,
}

impl Catalog<File> {
    /// Open a catalog file. Failing to open it is fatal for the run.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let reader = builder().from_path(path).map_err(|source| CatalogError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "catalog opened");
        Ok(Self { reader })
    }
}

impl<R: Read> Catalog<R> {
    pub fn from_reader(reader: R) -> Self {
        Self { reader: builder().from_reader(reader) }
    }

    /// Data rows in file order. The header row is consumed, never yielded.
    pub fn rows(self) -> Rows<R> {
        Rows { inner: self.reader.into_records(), done: false }
    }
}

fn builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(true).flexible(true).trim(csv::Trim::All);
    builder
}

/// Iterator over catalog rows.
pub struct Rows<R> {
    inner: csv::StringRecordsIntoIter<R>,
    done: bool,
}

impl<R: Read> Iterator for Rows<R> {
    type Item = Result<SourceRecord, MalformedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next()? {
            Ok(record) => {
                let line = record.position().map_or(0, |p| p.line());
                Some(parse_row(line, &record))
            }
            Err(err) => {
                let line = err.position().map_or(0, |p| p.line());
                // An I/O failure leaves the reader in an unknown state.
                if matches!(err.kind(), csv::ErrorKind::Io(_)) {
                    tracing::error!(line, error = %err, "catalog read failed; stopping");
                    self.done = true;
                }
                Some(Err(MalformedRecord { line, reason: err.to_string() }))
            }
        }
    }
}

fn parse_row(line: u64, record: &csv::StringRecord) -> Result<SourceRecord, MalformedRecord> {
    let malformed = |reason: String| MalformedRecord { line, reason };

    if record.len() != CATALOG_COLUMNS {
        return Err(malformed(format!(
            "expected {CATALOG_COLUMNS} columns, found {}",
            record.len()
        )));
    }

    let person_id = &record[2];
    if person_id.is_empty() {
        return Err(malformed("empty person id".into()));
    }
    // The person id becomes part of an artifact file name.
    if person_id.contains(['/', '\\']) || person_id == "." || person_id == ".." {
        return Err(malformed(format!("person id {person_id:?} is not usable in a file name")));
    }

    let image_ref = resolve::normalize_separators(&record[3]);
    if resolve::basename(&image_ref).is_empty() {
        return Err(malformed(format!("image reference {image_ref:?} has no file name")));
    }

    Ok(SourceRecord {
        line,
        serial: record[0].to_string(),
        display_name: record[1].to_string(),
        person_id: person_id.to_string(),
        image_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(csv: &str) -> Vec<Result<SourceRecord, MalformedRecord>> {
        Catalog::from_reader(csv.as_bytes()).rows().collect()
    }

    #[test]
    fn test_header_is_skipped_and_order_kept() {
        let rows = load(
            "Sr No.,Name,ID,Image Path\n\
             1,Ada,P001,images/ada.jpg\n\
             2,Bob,P002,bob.png\n",
        );
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.line, 2);
        assert_eq!(first.serial, "1");
        assert_eq!(first.display_name, "Ada");
        assert_eq!(rows[1].as_ref().unwrap().person_id, "P002");
    }

    #[test]
    fn test_backslashes_normalized_at_load() {
        let rows = load("h1,h2,h3,h4\n1,Ada,P001,C:\\photos\\ada.jpg\n");
        assert_eq!(rows[0].as_ref().unwrap().image_ref, "C:/photos/ada.jpg");
    }

    #[test]
    fn test_wrong_arity_is_malformed_and_loading_continues() {
        let rows = load(
            "h1,h2,h3,h4\n\
             1,Ada,P001\n\
             2,Bob,P002,bob.jpg,extra\n\
             3,Cy,P003,cy.jpg\n",
        );
        assert_eq!(rows.len(), 3);
        let err = rows[0].as_ref().unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("found 3"), "{}", err.reason);
        assert!(rows[1].as_ref().unwrap_err().reason.contains("found 5"));
        assert_eq!(rows[2].as_ref().unwrap().person_id, "P003");
    }

    #[test]
    fn test_empty_person_id_is_malformed() {
        let rows = load("h1,h2,h3,h4\n1,Ada,  ,ada.jpg\n");
        assert!(rows[0].as_ref().unwrap_err().reason.contains("empty person id"));
    }

    #[test]
    fn test_person_id_with_separator_is_malformed() {
        let rows = load("h1,h2,h3,h4\n1,Ada,../P1,ada.jpg\n2,Bob,..,bob.jpg\n");
        assert!(rows[0].is_err());
        assert!(rows[1].is_err());
    }

    #[test]
    fn test_image_ref_without_file_name_is_malformed() {
        let rows = load("h1,h2,h3,h4\n1,Ada,P001,photos/\n");
        assert!(rows[0].as_ref().unwrap_err().reason.contains("no file name"));
    }

    #[test]
    fn test_quoted_fields() {
        let rows = load("h1,h2,h3,h4\n1,\"Lovelace, Ada\",P001,\"dir, with comma/ada.jpg\"\n");
        let rec = rows[0].as_ref().unwrap();
        assert_eq!(rec.display_name, "Lovelace, Ada");
        assert_eq!(rec.image_ref, "dir, with comma/ada.jpg");
    }

    #[test]
    fn test_header_only() {
        assert!(load("Sr No.,Name,ID,Image Path\n").is_empty());
    }

    #[test]
    fn test_open_missing_catalog_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Catalog::open(&dir.path().join("info.csv")).err().expect("missing file");
        assert!(matches!(err, CatalogError::Open { .. }));
    }
}
