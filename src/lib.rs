//! pki-local - Serverless Certificate Authority Library
//!
//! Creates a root CA and issues client and server certificates from it without any running
//! service. Every certificate is stored together with its private key in a pluggable record
//! store, by default a single JSON file.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed or imported, CA=true)
//!   ├── Server certificate (serverAuth, CA=false)
//!   └── Client certificate (clientAuth, CA=false)
//! ```
//!
//! - [`key`]: the closed set of supported private keys (ECDSA, RSA, Ed25519) and their codecs
//! - [`key_factory`]: algorithm selection for freshly generated keys
//! - [`certificate`]: certificate policy, requests and signing
//! - [`authority`]: the signing state machine
//! - [`storage`]: record store contract with file and memory drivers
//! - [`agent`]: the operations the command line exposes
//! - [`configs`]: TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use pki_local::agent::Agent;
//! use pki_local::key_factory::default_factory;
//! use pki_local::storage::LocalStorage;
//!
//! fn main() -> pki_local::Result<()> {
//!     let agent = Agent::new(LocalStorage::new("store.json"), default_factory());
//!     agent.build_ca("Example Root CA")?;
//!     agent.build_server_full("svc.example")?;
//!
//!     for pem in agent.show_cert("svc.example")? {
//!         print!("{pem}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod authority;
pub mod certificate;
pub mod configs;
pub mod error;
pub mod key;
pub mod key_factory;
pub mod storage;

pub use agent::Agent;
pub use certificate::{Certificate, CertificateType};
pub use error::{ErrorKind, PkiError, Result};
pub use key::Key;
