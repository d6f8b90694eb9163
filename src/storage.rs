//! Record Store Module
//!
//! The authority persists every issued certificate together with its private key as an
//! [`Entry`]. Any backend implementing [`Storage`] can hold them; two ship with the crate:
//!
//! - [`LocalStorage`]: a JSON document on disk, replaced atomically on every write
//! - [`MemoryStorage`]: an in-process record set for tests and embedding
//!
//! # Upsert Rules
//!
//! `put` never deletes anything except the entries the new one replaces:
//! - a root entry replaces whichever entry is currently the root
//! - any entry replaces an existing entry with the same serial number
//!
//! so there is at most one root, and serial numbers stay unique.

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::Result;
use crate::key::Key;

/// A persisted certificate and its private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    /// Lowercase hex of the certificate serial number
    pub serial_number: String,
    /// Rendered subject distinguished name, e.g. `CN=example`
    pub subject: String,
    /// DER certificate
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
    /// Tagged key encoding (see [`Key::encode_binary`])
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    pub root: bool,
    #[serde(default)]
    pub revoked: bool,
}

impl Entry {
    /// Build an unrevoked entry for an issued certificate and its key
    pub fn new(certificate: &Certificate, key: &Key, root: bool) -> Result<Self> {
        Ok(Self {
            serial_number: certificate.serial_number_hex()?,
            subject: certificate.subject().to_string(),
            certificate: certificate.to_der()?,
            key: key.encode_binary()?,
            root,
            revoked: false,
        })
    }

    pub fn parse_certificate(&self) -> Result<Certificate> {
        Certificate::from_der(&self.certificate)
    }

    pub fn parse_key(&self) -> Result<Key> {
        Key::decode_binary(&self.key)
    }
}

/// Operations the authority requires from a record store.
///
/// Implementations may assume a single process; each `put` must be atomic from the
/// caller's point of view.
pub trait Storage {
    /// Insert or replace an entry (see the module docs for the replacement rules)
    fn put(&self, entry: Entry) -> Result<()>;

    /// The current root CA entry, if one exists
    fn get_root(&self) -> Result<Option<Entry>>;

    fn get_by_serial_number(&self, serial_number: &str) -> Result<Option<Entry>>;

    /// All entries whose rendered subject equals `subject` exactly
    fn get_by_subject(&self, subject: &str) -> Result<Vec<Entry>>;

    fn get_revoked(&self) -> Result<Vec<Entry>>;
}

/// Apply `put` semantics to an in-memory record set.
///
/// The new entry goes first; survivors keep their relative order.
pub(crate) fn upsert(entries: Vec<Entry>, new_entry: Entry) -> Vec<Entry> {
    let mut updated = Vec::with_capacity(entries.len() + 1);
    let replaced = |existing: &Entry| {
        (existing.root && new_entry.root) || existing.serial_number == new_entry.serial_number
    };
    let survivors: Vec<Entry> = entries.into_iter().filter(|e| !replaced(e)).collect();
    updated.push(new_entry);
    updated.extend(survivors);
    updated
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
