//! In-memory record store.
//!
//! Same replacement rules as the file store; data is lost when the value is dropped.

use std::sync::RwLock;

use super::{upsert, Entry, Storage};
use crate::error::{PkiError, Result};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<Vec<Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, newest first
    pub fn entries(&self) -> Result<Vec<Entry>> {
        self.read(|entries| entries.to_vec())
    }

    fn read<T>(&self, f: impl FnOnce(&[Entry]) -> T) -> Result<T> {
        let entries = self.entries.read().map_err(|_| PkiError::StorageRead {
            reason: "record set lock poisoned".to_string(),
            source: None,
        })?;
        Ok(f(&entries))
    }
}

impl Storage for MemoryStorage {
    fn put(&self, entry: Entry) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| PkiError::StorageWrite {
            reason: "record set lock poisoned".to_string(),
            source: None,
        })?;
        let current = std::mem::take(&mut *entries);
        *entries = upsert(current, entry);
        Ok(())
    }

    fn get_root(&self) -> Result<Option<Entry>> {
        self.read(|entries| entries.iter().find(|e| e.root).cloned())
    }

    fn get_by_serial_number(&self, serial_number: &str) -> Result<Option<Entry>> {
        self.read(|entries| {
            entries
                .iter()
                .find(|e| e.serial_number == serial_number)
                .cloned()
        })
    }

    fn get_by_subject(&self, subject: &str) -> Result<Vec<Entry>> {
        self.read(|entries| {
            entries
                .iter()
                .filter(|e| e.subject == subject)
                .cloned()
                .collect()
        })
    }

    fn get_revoked(&self) -> Result<Vec<Entry>> {
        self.read(|entries| entries.iter().filter(|e| e.revoked).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::entry;

    #[test]
    fn test_single_root() {
        let storage = MemoryStorage::new();
        storage.put(entry("01", "CN=first", true)).unwrap();
        storage.put(entry("02", "CN=leaf", false)).unwrap();
        storage.put(entry("03", "CN=second", true)).unwrap();

        let entries = storage.entries().unwrap();
        assert_eq!(entries.iter().filter(|e| e.root).count(), 1);
        assert_eq!(storage.get_root().unwrap().unwrap().subject, "CN=second");
        assert!(storage.get_by_serial_number("02").unwrap().is_some());
        assert!(storage.get_by_serial_number("01").unwrap().is_none());
    }

    #[test]
    fn test_subject_match_is_exact() {
        let storage = MemoryStorage::new();
        storage.put(entry("01", "CN=foo", false)).unwrap();
        storage.put(entry("02", "CN=foobar", false)).unwrap();
        storage.put(entry("03", "cn=foo", false)).unwrap();

        let found = storage.get_by_subject("CN=foo").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial_number, "01");
    }
}
