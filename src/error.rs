//! Error taxonomy for the certificate authority.
//!
//! Every layer wraps the error it received with the name of the operation it was performing
//! (see [`ResultExt::context`]). Wrapping never changes what went wrong: [`PkiError::kind`]
//! looks through any number of context layers and reports the original failure.

use openssl::error::ErrorStack;
use thiserror::Error;

/// Result type alias for certificate authority operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Errors produced by key handling, certificate issuance and storage
#[derive(Error, Debug)]
pub enum PkiError {
    /// Key material could not be generated
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        reason: String,
        #[source]
        source: Option<ErrorStack>,
    },

    /// Key bytes or PEM could not be decoded
    #[error("malformed key: {reason}")]
    MalformedKey {
        reason: String,
        #[source]
        source: Option<ErrorStack>,
    },

    /// The key algorithm or encoding tag is not one this system handles
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// CSR or certificate construction, signing or parsing failed
    #[error("certificate build failed: {reason}")]
    CertificateBuild {
        reason: String,
        #[source]
        source: Option<ErrorStack>,
    },

    /// An operation that needs a root CA found none in the store
    #[error("no root CA in store")]
    NoRootCa,

    /// No stored entry carries the requested serial number
    #[error("no certificate with serial number {0}")]
    CertificateNotFound(String),

    /// The record store could not be read or decoded
    #[error("storage read failed: {reason}")]
    StorageRead {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The record store could not be written
    #[error("storage write failed: {reason}")]
    StorageWrite {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// A lower-layer error annotated with the operation that was running
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<PkiError>,
    },
}

/// The kind of failure, independent of how many context layers wrap it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyGeneration,
    MalformedKey,
    UnsupportedKeyType,
    CertificateBuild,
    NoRootCa,
    CertificateNotFound,
    StorageRead,
    StorageWrite,
    Config,
}

impl PkiError {
    pub(crate) fn key_generation(reason: impl Into<String>, source: ErrorStack) -> Self {
        Self::KeyGeneration {
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub(crate) fn malformed_key(reason: impl Into<String>, source: Option<ErrorStack>) -> Self {
        Self::MalformedKey {
            reason: reason.into(),
            source,
        }
    }

    pub(crate) fn certificate_build(reason: impl Into<String>, source: ErrorStack) -> Self {
        Self::CertificateBuild {
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub(crate) fn invalid_certificate(reason: impl Into<String>) -> Self {
        Self::CertificateBuild {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn storage_read<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StorageRead {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn storage_write<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StorageWrite {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap this error with the name of the calling operation
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the original kind of failure, skipping context layers
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyGeneration { .. } => ErrorKind::KeyGeneration,
            Self::MalformedKey { .. } => ErrorKind::MalformedKey,
            Self::UnsupportedKeyType(_) => ErrorKind::UnsupportedKeyType,
            Self::CertificateBuild { .. } => ErrorKind::CertificateBuild,
            Self::NoRootCa => ErrorKind::NoRootCa,
            Self::CertificateNotFound(_) => ErrorKind::CertificateNotFound,
            Self::StorageRead { .. } => ErrorKind::StorageRead,
            Self::StorageWrite { .. } => ErrorKind::StorageWrite,
            Self::Config(_) => ErrorKind::Config,
            Self::Context { source, .. } => source.kind(),
        }
    }
}

/// Adds operation context to fallible results
pub trait ResultExt<T> {
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}
