//! Private Key Module
//!
//! A [`Key`] wraps exactly one of the private key algorithms this authority can issue with:
//! RSA, ECDSA or Ed25519. All encode, decode and signing sites match exhaustively on the
//! variant, so adding an algorithm means extending the enum and those match arms.
//!
//! # Binary Encoding
//!
//! Keys are persisted in the record store with a one-byte algorithm tag followed by the
//! algorithm-native encoding:
//!
//! ```text
//! [0x00][SEC1 ECPrivateKey DER]       ECDSA
//! [0x01][PKCS#1 RSAPrivateKey DER]    RSA
//! [0x02][32-byte raw private seed]    Ed25519
//! ```
//!
//! The tag values are part of the store format and must never be renumbered.
//!
//! # PEM Encoding
//!
//! ECDSA and RSA keys use the traditional `EC PRIVATE KEY` / `RSA PRIVATE KEY` blocks. When a
//! password is supplied the block is encrypted with AES-256-CBC using the legacy
//! `Proc-Type`/`DEK-Info` header convention. That scheme is unauthenticated and derives the
//! key with a single MD5 round; it exists for interchange with older tooling, not as
//! protection at rest. Ed25519 has no traditional block and is written as PKCS#8.

use openssl::bn::BigNumContext;
use openssl::ec::{EcKey, PointConversionForm};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use openssl::symm::Cipher;
use std::fmt;

use crate::error::{PkiError, Result};

/// Tag byte for SEC1-encoded ECDSA keys
pub const TAG_ECDSA: u8 = 0;
/// Tag byte for PKCS#1-encoded RSA keys
pub const TAG_RSA: u8 = 1;
/// Tag byte for raw Ed25519 seeds
pub const TAG_ED25519: u8 = 2;

const PEM_LABEL_EC: &str = "EC PRIVATE KEY";
const PEM_LABEL_RSA: &str = "RSA PRIVATE KEY";
const PEM_LABEL_PKCS8: &str = "PRIVATE KEY";
const PEM_LABEL_PKCS8_ENCRYPTED: &str = "ENCRYPTED PRIVATE KEY";

/// An asymmetric private key of one supported algorithm
#[derive(Clone)]
pub enum Key {
    Rsa(Rsa<Private>),
    Ecdsa(EcKey<Private>),
    Ed25519(PKey<Private>),
}

impl Key {
    /// Short algorithm name, used in logs and error messages
    pub fn algorithm(&self) -> &'static str {
        match self {
            Key::Rsa(_) => "rsa",
            Key::Ecdsa(_) => "ecdsa",
            Key::Ed25519(_) => "ed25519",
        }
    }

    /// The key as a generic OpenSSL `PKey`, as required by the X.509 builders
    pub fn pkey(&self) -> Result<PKey<Private>> {
        let pkey = match self {
            Key::Rsa(rsa) => PKey::from_rsa(rsa.clone()),
            Key::Ecdsa(ec) => PKey::from_ec_key(ec.clone()),
            Key::Ed25519(pkey) => Ok(pkey.clone()),
        };
        pkey.map_err(|e| PkiError::malformed_key("failed to wrap private key", Some(e)))
    }

    /// Digest used when this key signs a request or certificate.
    ///
    /// Ed25519 signs the message directly and must be given the null digest.
    pub fn signing_digest(&self) -> MessageDigest {
        match self {
            Key::Rsa(_) | Key::Ecdsa(_) => MessageDigest::sha256(),
            Key::Ed25519(_) => MessageDigest::null(),
        }
    }

    /// DER-encoded SubjectPublicKeyInfo of the public half
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        self.pkey()?
            .public_key_to_der()
            .map_err(|e| PkiError::malformed_key("failed to encode public key", Some(e)))
    }

    /// Sign `message` (SHA-256 for RSA and ECDSA, pure Ed25519 otherwise)
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let pkey = self.pkey()?;
        let signature = (|| -> std::result::Result<Vec<u8>, ErrorStack> {
            let mut signer = match self {
                Key::Rsa(_) | Key::Ecdsa(_) => Signer::new(MessageDigest::sha256(), &pkey)?,
                Key::Ed25519(_) => Signer::new_without_digest(&pkey)?,
            };
            signer.sign_oneshot_to_vec(message)
        })();
        signature.map_err(|e| PkiError::malformed_key("failed to sign message", Some(e)))
    }

    /// Verify a signature produced by [`Key::sign`] against this key's public half
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        let pkey = self.pkey()?;
        let verified = (|| -> std::result::Result<bool, ErrorStack> {
            let mut verifier = match self {
                Key::Rsa(_) | Key::Ecdsa(_) => Verifier::new(MessageDigest::sha256(), &pkey)?,
                Key::Ed25519(_) => Verifier::new_without_digest(&pkey)?,
            };
            verifier.verify_oneshot(signature, message)
        })();
        verified.map_err(|e| PkiError::malformed_key("failed to verify signature", Some(e)))
    }

    /// Whether `public_key` is the public half of this key
    pub fn matches_public_key<T>(&self, public_key: &PKeyRef<T>) -> Result<bool>
    where
        T: openssl::pkey::HasPublic,
    {
        Ok(self.pkey()?.public_eq(public_key))
    }

    /// Encode as `[tag][algorithm-native private key bytes]`
    pub fn encode_binary(&self) -> Result<Vec<u8>> {
        let (tag, body) = match self {
            Key::Ecdsa(ec) => (TAG_ECDSA, ec.private_key_to_der()),
            Key::Rsa(rsa) => (TAG_RSA, rsa.private_key_to_der()),
            Key::Ed25519(pkey) => (TAG_ED25519, pkey.raw_private_key()),
        };
        let body = body.map_err(|e| {
            PkiError::malformed_key(format!("failed to encode {} key", self.algorithm()), Some(e))
        })?;

        let mut encoded = Vec::with_capacity(body.len() + 1);
        encoded.push(tag);
        encoded.extend_from_slice(&body);
        Ok(encoded)
    }

    /// Decode bytes produced by [`Key::encode_binary`]
    pub fn decode_binary(bytes: &[u8]) -> Result<Key> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| PkiError::malformed_key("empty key encoding", None))?;

        match *tag {
            TAG_ECDSA => EcKey::private_key_from_der(body)
                .map(Key::Ecdsa)
                .map_err(|e| PkiError::malformed_key("invalid SEC1 ECDSA key", Some(e))),
            TAG_RSA => Rsa::private_key_from_der(body)
                .map(Key::Rsa)
                .map_err(|e| PkiError::malformed_key("invalid PKCS#1 RSA key", Some(e))),
            TAG_ED25519 => PKey::private_key_from_raw_bytes(body, Id::ED25519)
                .map(Key::Ed25519)
                .map_err(|e| PkiError::malformed_key("invalid Ed25519 seed", Some(e))),
            other => Err(PkiError::UnsupportedKeyType(format!(
                "unknown key encoding tag {other}"
            ))),
        }
    }

    /// Encode as a PEM block, encrypting with AES-256-CBC when a password is given
    pub fn encode_pem(&self, password: Option<&[u8]>) -> Result<Vec<u8>> {
        let cipher = Cipher::aes_256_cbc();
        let pem = match (self, password) {
            (Key::Ecdsa(ec), None) => ec.private_key_to_pem(),
            (Key::Ecdsa(ec), Some(pass)) => ec.private_key_to_pem_passphrase(cipher, pass),
            (Key::Rsa(rsa), None) => rsa.private_key_to_pem(),
            (Key::Rsa(rsa), Some(pass)) => rsa.private_key_to_pem_passphrase(cipher, pass),
            (Key::Ed25519(pkey), None) => pkey.private_key_to_pem_pkcs8(),
            (Key::Ed25519(pkey), Some(pass)) => {
                pkey.private_key_to_pem_pkcs8_passphrase(cipher, pass)
            }
        };
        pem.map_err(|e| {
            PkiError::malformed_key(format!("failed to PEM-encode {} key", self.algorithm()), Some(e))
        })
    }

    /// Decode an unencrypted PEM private key, selecting the decoder from the block label.
    ///
    /// Encrypted blocks are rejected: passwords are only accepted on the encode side.
    pub fn decode_pem(pem: &[u8]) -> Result<Key> {
        let text = std::str::from_utf8(pem)
            .map_err(|_| PkiError::malformed_key("PEM input is not valid UTF-8", None))?;
        let label = pem_label(text)
            .ok_or_else(|| PkiError::malformed_key("no PEM block found", None))?;

        if label == PEM_LABEL_PKCS8_ENCRYPTED || text.contains("Proc-Type: 4,ENCRYPTED") {
            return Err(PkiError::malformed_key(
                "encrypted PEM keys cannot be decoded",
                None,
            ));
        }

        match label {
            PEM_LABEL_EC => EcKey::private_key_from_pem(pem)
                .map(Key::Ecdsa)
                .map_err(|e| PkiError::malformed_key("invalid EC PRIVATE KEY block", Some(e))),
            PEM_LABEL_RSA => Rsa::private_key_from_pem(pem)
                .map(Key::Rsa)
                .map_err(|e| PkiError::malformed_key("invalid RSA PRIVATE KEY block", Some(e))),
            PEM_LABEL_PKCS8 => {
                let pkey = PKey::private_key_from_pem(pem)
                    .map_err(|e| PkiError::malformed_key("invalid PRIVATE KEY block", Some(e)))?;
                Key::from_pkey(pkey)
            }
            other => Err(PkiError::UnsupportedKeyType(format!(
                "PEM block type {other:?}"
            ))),
        }
    }

    /// Narrow a generic OpenSSL key to one of the supported variants
    pub fn from_pkey(pkey: PKey<Private>) -> Result<Key> {
        match pkey.id() {
            Id::RSA => pkey
                .rsa()
                .map(Key::Rsa)
                .map_err(|e| PkiError::malformed_key("invalid RSA key", Some(e))),
            Id::EC => pkey
                .ec_key()
                .map(Key::Ecdsa)
                .map_err(|e| PkiError::malformed_key("invalid EC key", Some(e))),
            Id::ED25519 => Ok(Key::Ed25519(pkey)),
            other => Err(PkiError::UnsupportedKeyType(format!(
                "OpenSSL key id {}",
                other.as_raw()
            ))),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("algorithm", &self.algorithm())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Bytes of the subjectPublicKey BIT STRING inside a SubjectPublicKeyInfo.
///
/// RSA keys carry the PKCS#1 RSAPublicKey, EC keys the uncompressed point and Ed25519 keys
/// the raw 32-byte public key.
pub(crate) fn public_key_bits(public_key: &PKeyRef<Public>) -> Result<Vec<u8>> {
    let bits = match public_key.id() {
        Id::RSA => public_key.rsa().and_then(|rsa| rsa.public_key_to_der_pkcs1()),
        Id::EC => (|| -> std::result::Result<Vec<u8>, ErrorStack> {
            let ec = public_key.ec_key()?;
            let mut ctx = BigNumContext::new()?;
            ec.public_key()
                .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
        })(),
        Id::ED25519 => public_key.raw_public_key(),
        other => {
            return Err(PkiError::UnsupportedKeyType(format!(
                "OpenSSL key id {}",
                other.as_raw()
            )))
        }
    };
    bits.map_err(|e| PkiError::malformed_key("failed to read public key bits", Some(e)))
}

fn pem_label(text: &str) -> Option<&str> {
    let start = text.find("-----BEGIN ")? + "-----BEGIN ".len();
    let rest = &text[start..];
    let end = rest.find("-----")?;
    Some(&rest[..end])
}
