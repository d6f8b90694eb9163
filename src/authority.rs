//! Certificate Authority Module
//!
//! The [`Authority`] signs certificates with the single CA key it holds. It is a small state
//! machine:
//!
//! ```text
//! Uninitialized ──build_full(Ca)──▶ SelfSigned
//! from_raw / from_parts ──────────▶ Delegated
//! ```
//!
//! An `Uninitialized` authority has no signer yet; its first build produces a self-signed
//! root and the freshly generated key becomes the signer. A `Delegated` authority resumes a
//! CA that was built or imported earlier. In both signing states every build issues a leaf
//! (or further certificates) chained to the held CA certificate.
//!
//! # Example
//! ```no_run
//! use pki_local::authority::Authority;
//! use pki_local::certificate::CertificateType;
//! use pki_local::key_factory::default_factory;
//!
//! # fn example() -> pki_local::Result<()> {
//! let factory = default_factory();
//! let mut authority = Authority::new(factory.as_ref());
//! let (root, _root_key) = authority.build_full(CertificateType::Ca, "Example Root CA")?;
//! let (server, _server_key) = authority.build_full(CertificateType::Server, "svc.example")?;
//! assert_eq!(server.issuer(), root.subject());
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info};

use crate::certificate::{Certificate, CertificateRequest, CertificateType, Issuer, PreCertificate};
use crate::error::{PkiError, Result, ResultExt};
use crate::key::Key;
use crate::key_factory::KeyFactory;

enum State {
    Uninitialized,
    SelfSigned { certificate: Certificate, key: Key },
    Delegated { certificate: Certificate, key: Key },
}

/// Issues certificates according to [`CertificateType`] policy
pub struct Authority<'f> {
    state: State,
    factory: &'f dyn KeyFactory,
}

impl<'f> Authority<'f> {
    /// An authority with no CA yet; the next build must be a CA certificate
    pub fn new(factory: &'f dyn KeyFactory) -> Self {
        Self {
            state: State::Uninitialized,
            factory,
        }
    }

    /// Resume an existing CA from its DER certificate and tagged key encoding
    pub fn from_raw(cert_der: &[u8], key_bytes: &[u8], factory: &'f dyn KeyFactory) -> Result<Self> {
        let certificate = Certificate::from_der(cert_der).context("parse CA certificate")?;
        let key = Key::decode_binary(key_bytes).context("decode CA key")?;
        Ok(Self::from_parts(certificate, key, factory))
    }

    /// Resume an existing CA from already parsed parts
    pub fn from_parts(certificate: Certificate, key: Key, factory: &'f dyn KeyFactory) -> Self {
        Self {
            state: State::Delegated { certificate, key },
            factory,
        }
    }

    /// The CA certificate this authority signs with, if it has one yet
    #[cfg(test)]
    fn certificate(&self) -> Option<&Certificate> {
        match &self.state {
            State::Uninitialized => None,
            State::SelfSigned { certificate, .. } | State::Delegated { certificate, .. } => {
                Some(certificate)
            }
        }
    }

    /// Generate a key, request and certificate for `common_name`.
    ///
    /// Returns the issued certificate and its newly generated private key. On an
    /// uninitialized authority only [`CertificateType::Ca`] is accepted; the result is
    /// self-signed and becomes this authority's signer. Nothing changes if any step fails.
    pub fn build_full(
        &mut self,
        cert_type: CertificateType,
        common_name: &str,
    ) -> Result<(Certificate, Key)> {
        if matches!(self.state, State::Uninitialized) && !cert_type.is_ca() {
            return Err(PkiError::invalid_certificate(format!(
                "an authority without a CA can only self-sign a ca certificate, not {cert_type}"
            )));
        }

        let key = self.factory.new_key().context("generate subject key")?;
        let request = CertificateRequest::new(common_name, &key).context("create request")?;
        debug!(common_name, algorithm = key.algorithm(), "Built certificate request");

        let der = match &self.state {
            State::Uninitialized => {
                let pre = PreCertificate::prepare(cert_type, &request, &Issuer::SelfSigned)
                    .context("prepare certificate")?;
                pre.sign(&request, &Issuer::SelfSigned, &key)
                    .context("self-sign certificate")?
            }
            State::SelfSigned { certificate, key: signer }
            | State::Delegated { certificate, key: signer } => {
                let issuer = Issuer::Parent(certificate.x509());
                let pre = PreCertificate::prepare(cert_type, &request, &issuer)
                    .context("prepare certificate")?;
                pre.sign(&request, &issuer, signer)
                    .context("sign certificate")?
            }
        };

        // Round-trip through DER so callers only ever see what a parser accepts
        let certificate = Certificate::from_der(&der).context("parse signed certificate")?;
        let serial = certificate.serial_number_hex()?;

        if matches!(self.state, State::Uninitialized) {
            self.state = State::SelfSigned {
                certificate: certificate.clone(),
                key: key.clone(),
            };
        }

        info!(
            cert_type = %cert_type,
            subject = %certificate.subject(),
            serial = %serial,
            "Issued certificate"
        );
        Ok((certificate, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::key_factory::{default_factory, Ed25519Factory, RsaFactory};

    fn text(certificate: &Certificate) -> String {
        String::from_utf8(certificate.x509().to_text().unwrap()).unwrap()
    }

    fn validity_days(certificate: &Certificate) -> (i32, i32) {
        let diff = certificate
            .x509()
            .not_before()
            .diff(certificate.x509().not_after())
            .unwrap();
        (diff.days, diff.secs)
    }

    #[test]
    fn test_self_signed_root() {
        let factory = default_factory();
        let mut authority = Authority::new(factory.as_ref());
        let (root, root_key) = authority.build_full(CertificateType::Ca, "Root").unwrap();

        assert_eq!(root.subject(), "CN=Root");
        assert_eq!(root.issuer(), "CN=Root");
        assert!(root.x509().verify(&root.public_key().unwrap()).unwrap());
        assert!(root_key.matches_public_key(&root.public_key().unwrap()).unwrap());
        assert_eq!(root.subject_key_id(), root.authority_key_id());
        assert_eq!(root.subject_key_id().unwrap().len(), 20);
        assert!(authority.certificate().is_some());
    }

    #[test]
    fn test_policy_table() {
        let factory = default_factory();
        let mut authority = Authority::new(factory.as_ref());
        let (root, _) = authority.build_full(CertificateType::Ca, "Root").unwrap();
        let (server, _) = authority.build_full(CertificateType::Server, "svc").unwrap();
        let (client, _) = authority.build_full(CertificateType::Client, "alice").unwrap();

        assert_eq!(validity_days(&root), (16 * 365 + 4, 0));
        assert_eq!(validity_days(&server), (8 * 365 + 2, 0));
        assert_eq!(validity_days(&client), (4 * 365 + 1, 0));

        let root_text = text(&root);
        assert!(root_text.contains("CA:TRUE"));
        assert!(root_text.contains("Certificate Sign, CRL Sign"));
        assert!(!root_text.contains("Extended Key Usage"));

        let server_text = text(&server);
        assert!(server_text.contains("CA:FALSE"));
        assert!(server_text.contains("Digital Signature, Key Encipherment"));
        assert!(server_text.contains("TLS Web Server Authentication"));
        assert!(!server_text.contains("TLS Web Client Authentication"));

        let client_text = text(&client);
        assert!(client_text.contains("CA:FALSE"));
        assert!(client_text.contains("Digital Signature"));
        assert!(!client_text.contains("Key Encipherment"));
        assert!(client_text.contains("TLS Web Client Authentication"));
    }

    #[test]
    fn test_leaf_chains_to_root() {
        let factory = default_factory();
        let mut authority = Authority::new(factory.as_ref());
        let (root, _) = authority.build_full(CertificateType::Ca, "Root").unwrap();
        let (leaf, leaf_key) = authority.build_full(CertificateType::Server, "svc").unwrap();

        assert_eq!(leaf.issuer(), root.subject());
        assert_eq!(leaf.authority_key_id(), root.authority_key_id());
        assert_ne!(leaf.subject_key_id(), root.subject_key_id());
        assert!(leaf.x509().verify(&root.public_key().unwrap()).unwrap());
        assert!(leaf_key.matches_public_key(&leaf.public_key().unwrap()).unwrap());
    }

    #[test]
    fn test_child_copies_parent_authority_key_id() {
        let factory = default_factory();
        let (root, root_key) = Authority::new(factory.as_ref())
            .build_full(CertificateType::Ca, "Root")
            .unwrap();
        let (sub, sub_key) = Authority::from_parts(root.clone(), root_key, factory.as_ref())
            .build_full(CertificateType::Ca, "Sub")
            .unwrap();
        assert_eq!(sub.authority_key_id(), root.subject_key_id());
        assert_ne!(sub.authority_key_id(), sub.subject_key_id());

        let (leaf, _) = Authority::from_parts(sub.clone(), sub_key, factory.as_ref())
            .build_full(CertificateType::Client, "alice")
            .unwrap();
        assert_eq!(leaf.issuer(), "CN=Sub");
        assert_eq!(leaf.authority_key_id(), sub.authority_key_id());
        assert_ne!(leaf.authority_key_id(), sub.subject_key_id());
        assert!(leaf.x509().verify(&sub.public_key().unwrap()).unwrap());
    }

    #[test]
    fn test_uninitialized_rejects_leaf() {
        let factory = default_factory();
        let mut authority = Authority::new(factory.as_ref());
        let err = authority
            .build_full(CertificateType::Client, "alice")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CertificateBuild);
        assert!(authority.certificate().is_none());
    }

    #[test]
    fn test_from_raw_resumes_ca() {
        let factory = default_factory();
        let (root, root_key) = Authority::new(factory.as_ref())
            .build_full(CertificateType::Ca, "Root")
            .unwrap();

        let mut resumed = Authority::from_raw(
            &root.to_der().unwrap(),
            &root_key.encode_binary().unwrap(),
            factory.as_ref(),
        )
        .unwrap();
        let (client, _) = resumed.build_full(CertificateType::Client, "bob").unwrap();

        assert_eq!(client.issuer(), "CN=Root");
        assert!(client.x509().verify(&root.public_key().unwrap()).unwrap());
    }

    #[test]
    fn test_from_raw_rejects_garbage() {
        let factory = default_factory();
        let err = Authority::from_raw(b"not a cert", &[0, 1, 2], factory.as_ref())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::CertificateBuild);
    }

    #[test]
    fn test_mixed_algorithms() {
        let rsa = RsaFactory::new(2048);
        let (root, root_key) = Authority::new(&rsa)
            .build_full(CertificateType::Ca, "RSA Root")
            .unwrap();

        let ed25519 = Ed25519Factory;
        let mut authority = Authority::from_parts(root.clone(), root_key, &ed25519);
        let (leaf, leaf_key) = authority.build_full(CertificateType::Server, "edge").unwrap();

        assert_eq!(leaf_key.algorithm(), "ed25519");
        assert!(leaf.x509().verify(&root.public_key().unwrap()).unwrap());

        let (ed_root, _) = Authority::new(&ed25519)
            .build_full(CertificateType::Ca, "Ed Root")
            .unwrap();
        assert!(ed_root.x509().verify(&ed_root.public_key().unwrap()).unwrap());
    }
}
