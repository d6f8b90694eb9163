//! Orchestration Module
//!
//! [`Agent`] is the entry point the command line drives. Each operation loads whatever it
//! needs from the record store, runs one [`Authority`] build and persists the result. The
//! store and key factory are injected so the same flow runs against a JSON file or memory.

use tracing::{debug, info};

use crate::authority::Authority;
use crate::certificate::{Certificate, CertificateType};
use crate::error::{PkiError, Result, ResultExt};
use crate::key::Key;
use crate::key_factory::KeyFactory;
use crate::storage::{Entry, Storage};

pub struct Agent<S: Storage> {
    storage: S,
    factory: Box<dyn KeyFactory>,
}

impl<S: Storage> Agent<S> {
    pub fn new(storage: S, factory: Box<dyn KeyFactory>) -> Self {
        Self { storage, factory }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Create a new self-signed root CA and make it the store's root.
    ///
    /// A previous root is replaced; certificates it issued stay in the store.
    pub fn build_ca(&self, common_name: &str) -> Result<Certificate> {
        let (certificate, key) = Authority::new(self.factory.as_ref())
            .build_full(CertificateType::Ca, common_name)
            .context("build CA certificate")?;

        let entry = Entry::new(&certificate, &key, true)?;
        let serial = entry.serial_number.clone();
        self.storage.put(entry).context("store CA certificate")?;

        info!(subject = %certificate.subject(), serial = %serial, "Root CA stored");
        Ok(certificate)
    }

    /// Issue a client certificate and key signed by the root CA
    pub fn build_client_full(&self, common_name: &str) -> Result<Certificate> {
        self.build_leaf(CertificateType::Client, common_name)
            .context("build client certificate")
    }

    /// Issue a server certificate and key signed by the root CA
    pub fn build_server_full(&self, common_name: &str) -> Result<Certificate> {
        self.build_leaf(CertificateType::Server, common_name)
            .context("build server certificate")
    }

    fn build_leaf(&self, cert_type: CertificateType, common_name: &str) -> Result<Certificate> {
        let root = self.root()?;
        let mut authority =
            Authority::from_raw(&root.certificate, &root.key, self.factory.as_ref())
                .context("launch authority")?;

        let (certificate, key) = authority.build_full(cert_type, common_name)?;
        let entry = Entry::new(&certificate, &key, false)?;
        let serial = entry.serial_number.clone();
        self.storage.put(entry).context("store certificate")?;

        info!(
            cert_type = %cert_type,
            subject = %certificate.subject(),
            serial = %serial,
            "Certificate stored"
        );
        Ok(certificate)
    }

    /// Store an externally created CA as the root without re-signing it.
    ///
    /// The key must be the private half of the certificate's public key.
    pub fn import_ca(&self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Certificate> {
        let certificate = Certificate::from_pem(cert_pem).context("parse imported certificate")?;
        let key = Key::decode_pem(key_pem).context("decode imported key")?;

        let public_key = certificate.public_key()?;
        if !key.matches_public_key(&public_key)? {
            return Err(PkiError::invalid_certificate(format!(
                "imported key does not match certificate {}",
                certificate.subject()
            )));
        }

        let entry = Entry::new(&certificate, &key, true)?;
        let serial = entry.serial_number.clone();
        self.storage.put(entry).context("store imported CA")?;

        info!(subject = %certificate.subject(), serial = %serial, "Root CA imported");
        Ok(certificate)
    }

    /// PEM of the root CA certificate
    pub fn show_ca(&self) -> Result<String> {
        let root = self.root()?;
        pem_string(&root.parse_certificate()?.to_pem()?)
    }

    /// PEM of every stored certificate whose subject is exactly `CN=<common_name>`
    pub fn show_cert(&self, common_name: &str) -> Result<Vec<String>> {
        let subject = format!("CN={common_name}");
        let entries = self
            .storage
            .get_by_subject(&subject)
            .context("look up certificates")?;
        debug!(subject = %subject, matches = entries.len(), "Subject lookup");

        entries
            .iter()
            .map(|entry| pem_string(&entry.parse_certificate()?.to_pem()?))
            .collect()
    }

    /// Mark the entry with `serial_number` as revoked and return it
    pub fn revoke(&self, serial_number: &str) -> Result<Entry> {
        let mut entry = self.entry(serial_number)?;
        if entry.revoked {
            debug!(serial = %serial_number, "Certificate already revoked");
            return Ok(entry);
        }

        entry.revoked = true;
        self.storage
            .put(entry.clone())
            .context("store revocation")?;

        info!(serial = %serial_number, subject = %entry.subject, "Certificate revoked");
        Ok(entry)
    }

    pub fn show_revoked(&self) -> Result<Vec<Entry>> {
        self.storage.get_revoked().context("list revoked certificates")
    }

    /// PEM private key of the entry with `serial_number`, encrypted if a password is given
    pub fn export_key(&self, serial_number: &str, password: Option<&[u8]>) -> Result<String> {
        let entry = self.entry(serial_number)?;
        let key = entry.parse_key().context("decode stored key")?;
        info!(
            serial = %serial_number,
            encrypted = password.is_some(),
            "Exporting private key"
        );
        pem_string(&key.encode_pem(password)?)
    }

    fn root(&self) -> Result<Entry> {
        self.storage
            .get_root()
            .context("look up root CA")?
            .ok_or(PkiError::NoRootCa)
    }

    fn entry(&self, serial_number: &str) -> Result<Entry> {
        self.storage
            .get_by_serial_number(serial_number)
            .context("look up certificate")?
            .ok_or_else(|| PkiError::CertificateNotFound(serial_number.to_string()))
    }
}

fn pem_string(pem: &[u8]) -> Result<String> {
    String::from_utf8(pem.to_vec())
        .map_err(|_| PkiError::invalid_certificate("PEM output is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::key_factory::{default_factory, Ed25519Factory};
    use crate::storage::MemoryStorage;

    fn agent() -> Agent<MemoryStorage> {
        Agent::new(MemoryStorage::new(), default_factory())
    }

    #[test]
    fn test_build_ca_then_leaves() {
        let agent = agent();
        let root = agent.build_ca("Root").unwrap();
        let server = agent.build_server_full("svc.example").unwrap();
        let client = agent.build_client_full("alice").unwrap();

        let stored_root = agent.storage().get_root().unwrap().unwrap();
        assert_eq!(stored_root.serial_number, root.serial_number_hex().unwrap());
        assert_eq!(server.issuer(), root.subject());
        assert_eq!(client.authority_key_id(), root.subject_key_id());

        for certificate in [&root, &server, &client] {
            let serial = certificate.serial_number_hex().unwrap();
            let entry = agent
                .storage()
                .get_by_serial_number(&serial)
                .unwrap()
                .unwrap();
            assert_eq!(entry.subject, certificate.subject());
            assert_eq!(entry.certificate, certificate.to_der().unwrap());
        }
    }

    #[test]
    fn test_leaf_without_root() {
        let agent = agent();
        let err = agent.build_client_full("alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRootCa);
        assert!(agent.storage().entries().unwrap().is_empty());

        assert_eq!(agent.show_ca().unwrap_err().kind(), ErrorKind::NoRootCa);
    }

    #[test]
    fn test_build_ca_twice_keeps_leaves() {
        let agent = agent();
        agent.build_ca("First").unwrap();
        agent.build_client_full("alice").unwrap();
        let second = agent.build_ca("Second").unwrap();

        let entries = agent.storage().entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| e.root).count(), 1);
        assert_eq!(
            agent.storage().get_root().unwrap().unwrap().subject,
            second.subject()
        );
    }

    #[test]
    fn test_show_cert_lists_all_matches() {
        let agent = agent();
        agent.build_ca("Root").unwrap();
        agent.build_client_full("foo").unwrap();
        agent.build_client_full("foo").unwrap();
        agent.build_client_full("foobar").unwrap();

        let pems = agent.show_cert("foo").unwrap();
        assert_eq!(pems.len(), 2);
        for pem in &pems {
            assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
            let certificate = Certificate::from_pem(pem.as_bytes()).unwrap();
            assert_eq!(certificate.common_name().unwrap().as_deref(), Some("foo"));
        }
        assert!(agent.show_cert("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_common_name_length_is_not_limited() {
        let agent = agent();
        agent.build_ca("Root").unwrap();

        let long_name = format!("{}.example.com", "a".repeat(60));
        let server = agent.build_server_full(&long_name).unwrap();
        assert_eq!(server.common_name().unwrap(), Some(long_name.clone()));
        assert_eq!(agent.show_cert(&long_name).unwrap().len(), 1);

        let anonymous = agent.build_client_full("").unwrap();
        assert_eq!(anonymous.subject(), "");
        assert_eq!(anonymous.common_name().unwrap(), None);
        assert_eq!(anonymous.issuer(), "CN=Root");
        let serial = anonymous.serial_number_hex().unwrap();
        assert!(agent.storage().get_by_serial_number(&serial).unwrap().is_some());
    }

    #[test]
    fn test_show_ca_is_root_pem() {
        let agent = agent();
        let root = agent.build_ca("Root").unwrap();
        let pem = agent.show_ca().unwrap();
        let parsed = Certificate::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(
            parsed.serial_number_hex().unwrap(),
            root.serial_number_hex().unwrap()
        );
    }

    #[test]
    fn test_import_ca_and_issue() {
        let (certificate, key) = Authority::new(&Ed25519Factory)
            .build_full(CertificateType::Ca, "External Root")
            .unwrap();
        let cert_pem = certificate.to_pem().unwrap();
        let key_pem = key.encode_pem(None).unwrap();

        let agent = agent();
        let imported = agent.import_ca(&cert_pem, &key_pem).unwrap();
        assert_eq!(imported.subject(), "CN=External Root");

        let leaf = agent.build_server_full("svc").unwrap();
        assert_eq!(leaf.issuer(), "CN=External Root");
        assert!(leaf.x509().verify(&certificate.public_key().unwrap()).unwrap());
    }

    #[test]
    fn test_import_ca_rejects_foreign_key() {
        let factory = default_factory();
        let (certificate, _) = Authority::new(factory.as_ref())
            .build_full(CertificateType::Ca, "Root")
            .unwrap();
        let other = factory.new_key().unwrap();

        let agent = agent();
        let err = agent
            .import_ca(
                &certificate.to_pem().unwrap(),
                &other.encode_pem(None).unwrap(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateBuild);
        assert!(agent.storage().get_root().unwrap().is_none());
    }

    #[test]
    fn test_import_ca_rejects_encrypted_key() {
        let factory = default_factory();
        let (certificate, key) = Authority::new(factory.as_ref())
            .build_full(CertificateType::Ca, "Root")
            .unwrap();

        let err = agent()
            .import_ca(
                &certificate.to_pem().unwrap(),
                &key.encode_pem(Some(b"secret")).unwrap(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedKey);
    }

    #[test]
    fn test_revoke() {
        let agent = agent();
        let root = agent.build_ca("Root").unwrap();
        let leaf = agent.build_client_full("alice").unwrap();
        let serial = leaf.serial_number_hex().unwrap();

        let revoked = agent.revoke(&serial).unwrap();
        assert!(revoked.revoked);
        assert!(!revoked.root);

        let listed = agent.show_revoked().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].serial_number, serial);
        assert_eq!(agent.storage().entries().unwrap().len(), 2);
        assert_eq!(
            agent.storage().get_root().unwrap().unwrap().serial_number,
            root.serial_number_hex().unwrap()
        );

        let err = agent.revoke("00ff").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateNotFound);
    }

    #[test]
    fn test_export_key() {
        let agent = agent();
        let root = agent.build_ca("Root").unwrap();
        let serial = root.serial_number_hex().unwrap();

        let pem = agent.export_key(&serial, None).unwrap();
        let key = Key::decode_pem(pem.as_bytes()).unwrap();
        assert!(key.matches_public_key(&root.public_key().unwrap()).unwrap());

        let encrypted = agent.export_key(&serial, Some(b"secret")).unwrap();
        assert!(encrypted.contains("ENCRYPTED"));

        let err = agent.export_key("00ff", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateNotFound);
    }
}
