//! JSON file gallery of enrolled identities.

use faceid_core::{decode_records, encode_records, FaceIdentityRecord, RecordError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: RecordError,
    },
}

pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is an empty gallery.
    pub fn load(&self) -> Result<Vec<FaceIdentityRecord>, StoreError> {
        let src = match std::fs::read_to_string(&self.path) {
            Ok(src) => src,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "gallery file absent; starting empty");
                return Ok(Vec::new());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let records = decode_records(&src).map_err(|source| StoreError::Record {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "gallery loaded");
        Ok(records)
    }

    /// Replace the gallery file. Writes a sibling temp file, then renames it into place.
    pub fn save(&self, records: &[FaceIdentityRecord]) -> Result<(), StoreError> {
        let json = encode_records(records).map_err(|source| StoreError::Record {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        tracing::info!(path = %self.path.display(), count = records.len(), "gallery saved");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Insert `record`, replacing any record with the same identity. Returns true on replace.
pub fn upsert(records: &mut Vec<FaceIdentityRecord>, record: FaceIdentityRecord) -> bool {
    match records
        .iter()
        .position(|r| r.identity_id() == record.identity_id())
    {
        Some(idx) => {
            records[idx] = record;
            true
        }
        None => {
            records.push(record);
            false
        }
    }
}

/// Remove the record for `identity_id`. Returns true if one was removed.
pub fn remove(records: &mut Vec<FaceIdentityRecord>, identity_id: &str) -> bool {
    let before = records.len();
    records.retain(|r| r.identity_id() != identity_id);
    records.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceid_core::Embedding;

    fn record(id: &str, values: &[f32]) -> FaceIdentityRecord {
        FaceIdentityRecord::new(id, Embedding::new(values.to_vec()), "1").unwrap()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("gallery.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("nested/gallery.json"));
        let records = vec![record("a", &[1.0, 0.0]), record("b", &[0.0, 1.0])];

        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), records);
        assert!(!dir.path().join("nested/gallery.json.tmp").exists());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = GalleryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Record { .. }));
    }

    #[test]
    fn test_upsert_replaces_same_identity() {
        let mut records = vec![record("a", &[1.0, 0.0])];
        assert!(!upsert(&mut records, record("b", &[0.0, 1.0])));
        assert!(upsert(&mut records, record("a", &[0.0, 1.0])));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].embedding().values(), &[0.0, 1.0]);
    }

    #[test]
    fn test_remove() {
        let mut records = vec![record("a", &[1.0]), record("b", &[1.0])];
        assert!(remove(&mut records, "a"));
        assert!(!remove(&mut records, "a"));
        assert_eq!(records.len(), 1);
    }
}
