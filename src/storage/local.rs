//! JSON file record store.
//!
//! The whole record set lives in a single JSON array. Every `put` rewrites it through a
//! temporary file in the same directory that is then renamed over the store, so readers see
//! either the old document or the new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{upsert, Entry, Storage};
use crate::error::{PkiError, Result};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record set; a missing file is an empty store
    fn load(&self) -> Result<Vec<Entry>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PkiError::storage_read(
                    format!("failed to open {}", self.path.display()),
                    e,
                ))
            }
        };

        serde_json::from_slice(&data).map_err(|e| {
            PkiError::storage_read(format!("failed to decode {}", self.path.display()), e)
        })
    }

    fn save(&self, entries: &[Entry]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write_error = |e: std::io::Error| {
            PkiError::storage_write(format!("failed to write {}", self.path.display()), e)
        };

        let mut file = NamedTempFile::new_in(&dir).map_err(write_error)?;
        let json = serde_json::to_vec(entries).map_err(|e| {
            PkiError::storage_write("failed to encode record set", e)
        })?;
        file.write_all(&json).map_err(write_error)?;
        file.write_all(b"\n").map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(&self.path)
            .map_err(|e| write_error(e.error))?;

        debug!(path = %self.path.display(), entries = entries.len(), "Wrote record store");
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn put(&self, entry: Entry) -> Result<()> {
        let entries = self.load()?;
        self.save(&upsert(entries, entry))
    }

    fn get_root(&self) -> Result<Option<Entry>> {
        Ok(self.load()?.into_iter().find(|e| e.root))
    }

    fn get_by_serial_number(&self, serial_number: &str) -> Result<Option<Entry>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|e| e.serial_number == serial_number))
    }

    fn get_by_subject(&self, subject: &str) -> Result<Vec<Entry>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| e.subject == subject)
            .collect())
    }

    fn get_revoked(&self) -> Result<Vec<Entry>> {
        Ok(self.load()?.into_iter().filter(|e| e.revoked).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind as PkiErrorKind;
    use crate::storage::tests::entry;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("store.json"));

        assert!(storage.get_root().unwrap().is_none());
        assert!(storage.get_by_subject("CN=x").unwrap().is_empty());
        assert!(storage.get_revoked().unwrap().is_empty());
    }

    #[test]
    fn test_put_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let storage = LocalStorage::new(&path);
        storage.put(entry("01", "CN=root", true)).unwrap();
        storage.put(entry("02", "CN=foo", false)).unwrap();
        storage.put(entry("03", "CN=foo", false)).unwrap();

        let reopened = LocalStorage::new(&path);
        assert_eq!(reopened.get_root().unwrap().unwrap().serial_number, "01");
        assert_eq!(
            reopened.get_by_serial_number("02").unwrap(),
            Some(entry("02", "CN=foo", false))
        );
        assert!(reopened.get_by_serial_number("04").unwrap().is_none());
        assert_eq!(reopened.get_by_subject("CN=foo").unwrap().len(), 2);
    }

    #[test]
    fn test_document_is_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let storage = LocalStorage::new(&path);
        storage.put(entry("01", "CN=root", true)).unwrap();

        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc.as_array().unwrap().len(), 1);
        assert_eq!(doc[0]["SerialNumber"], "01");
    }

    #[test]
    fn test_revoked_query() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("store.json"));
        storage.put(entry("01", "CN=root", true)).unwrap();
        let mut revoked = entry("02", "CN=foo", false);
        revoked.revoked = true;
        storage.put(revoked).unwrap();

        let found = storage.get_revoked().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial_number, "02");
    }

    #[test]
    fn test_corrupt_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();
        let storage = LocalStorage::new(&path);

        let err = storage.get_root().unwrap_err();
        assert_eq!(err.kind(), PkiErrorKind::StorageRead);

        let err = storage.put(entry("01", "CN=root", true)).unwrap_err();
        assert_eq!(err.kind(), PkiErrorKind::StorageRead);
        assert_eq!(std::fs::read(&path).unwrap(), b"{not json");
    }

    #[test]
    fn test_unwritable_directory_is_write_error() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("missing").join("store.json"));

        let err = storage.put(entry("01", "CN=root", true)).unwrap_err();
        assert_eq!(err.kind(), PkiErrorKind::StorageWrite);
    }
}
