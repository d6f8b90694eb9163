//! Key Factory Module
//!
//! Centralizes the algorithm choice made whenever the authority needs a fresh key. A factory
//! is a pure function of its configuration plus OpenSSL's CSPRNG.

use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use serde::Deserialize;
use tracing::debug;

use crate::error::{PkiError, Result};
use crate::key::Key;

/// Smallest RSA modulus accepted from configuration
pub const RSA_MIN_BITS: u32 = 2048;
const RSA_BITS_DEFAULT: u32 = 2048;

/// Generates new private keys of a fixed algorithm and parameter set
pub trait KeyFactory {
    fn new_key(&self) -> Result<Key>;
}

/// Named elliptic curves available to [`EcdsaFactory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Curve {
    #[serde(rename = "P-256")]
    P256,
    #[serde(rename = "P-384")]
    P384,
    #[serde(rename = "P-521")]
    P521,
}

impl Curve {
    fn nid(self) -> Nid {
        match self {
            Curve::P256 => Nid::X9_62_PRIME256V1,
            Curve::P384 => Nid::SECP384R1,
            Curve::P521 => Nid::SECP521R1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RsaFactory {
    bits: u32,
}

impl RsaFactory {
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }
}

impl KeyFactory for RsaFactory {
    fn new_key(&self) -> Result<Key> {
        debug!(bits = self.bits, "Generating RSA key");
        let rsa = Rsa::generate(self.bits)
            .map_err(|e| PkiError::key_generation("failed to generate RSA keypair", e))?;
        Ok(Key::Rsa(rsa))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EcdsaFactory {
    curve: Curve,
}

impl EcdsaFactory {
    pub fn new(curve: Curve) -> Self {
        Self { curve }
    }
}

impl KeyFactory for EcdsaFactory {
    fn new_key(&self) -> Result<Key> {
        debug!(curve = ?self.curve, "Generating ECDSA key");
        let group = EcGroup::from_curve_name(self.curve.nid())
            .map_err(|e| PkiError::key_generation("failed to load curve", e))?;
        let ec = EcKey::generate(&group)
            .map_err(|e| PkiError::key_generation("failed to generate ECDSA keypair", e))?;
        Ok(Key::Ecdsa(ec))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Factory;

impl KeyFactory for Ed25519Factory {
    fn new_key(&self) -> Result<Key> {
        debug!("Generating Ed25519 key");
        let pkey = PKey::generate_ed25519()
            .map_err(|e| PkiError::key_generation("failed to generate Ed25519 keypair", e))?;
        Ok(Key::Ed25519(pkey))
    }
}

/// Factory used when nothing else is configured: ECDSA on P-256
pub fn default_factory() -> Box<dyn KeyFactory> {
    Box::new(EcdsaFactory::new(Curve::P256))
}

/// Key algorithm selection as read from the `[key]` configuration table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Ecdsa {
        #[serde(default = "default_curve")]
        curve: Curve,
    },
    Rsa {
        #[serde(default = "default_rsa_bits")]
        bits: u32,
    },
    Ed25519,
}

fn default_curve() -> Curve {
    Curve::P256
}

fn default_rsa_bits() -> u32 {
    RSA_BITS_DEFAULT
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Ecdsa {
            curve: default_curve(),
        }
    }
}

impl KeyAlgorithm {
    /// Build the factory for this selection, rejecting weak parameters
    pub fn factory(&self) -> Result<Box<dyn KeyFactory>> {
        match self {
            KeyAlgorithm::Ecdsa { curve } => Ok(Box::new(EcdsaFactory::new(*curve))),
            KeyAlgorithm::Rsa { bits } if *bits < RSA_MIN_BITS => Err(PkiError::Config(format!(
                "RSA keys must be at least {RSA_MIN_BITS} bits, got {bits}"
            ))),
            KeyAlgorithm::Rsa { bits } => Ok(Box::new(RsaFactory::new(*bits))),
            KeyAlgorithm::Ed25519 => Ok(Box::new(Ed25519Factory)),
        }
    }
}
