//! pki-local - Serverless Certificate Authority
//!
//! Command line front end over [`pki_local::Agent`]. Certificates and keys go to the JSON
//! record store named by `--store` or the `[storage] path` configuration entry.
//!
//! ```bash
//! pki-local build-ca "Lab Root CA"
//! pki-local build-server-full svc.lab
//! pki-local show-cert svc.lab > svc.pem
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use pki_local::agent::Agent;
use pki_local::configs::AppConfig;
use pki_local::storage::LocalStorage;

/// Serverless certificate authority backed by a local record store
#[derive(Parser, Debug)]
#[command(name = "pki-local")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to ./pki-local.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Record store path, overriding the configuration
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a self-signed root CA, replacing any existing root
    BuildCa {
        /// CA common name
        name: Option<String>,
    },

    /// Issue a client certificate and key signed by the root CA
    BuildClientFull {
        /// Client common name
        name: Option<String>,
    },

    /// Issue a server certificate and key signed by the root CA
    BuildServerFull {
        /// Server common name
        name: Option<String>,
    },

    /// Print the root CA certificate as PEM
    ShowCa,

    /// Print every certificate issued to a common name as PEM
    ShowCert {
        #[arg(default_value = "")]
        name: String,
    },

    /// Import an existing CA certificate and unencrypted private key as the root
    ImportCa {
        /// PEM certificate file
        cert: PathBuf,
        /// PEM private key file
        key: PathBuf,
    },

    /// Mark a certificate as revoked
    Revoke {
        /// Serial number in hex
        serial: String,
    },

    /// List revoked certificates
    ShowRevoked,

    /// Print the private key of a certificate as PEM
    ExportKey {
        /// Serial number in hex
        serial: String,

        /// Encrypt the key with a password read from the terminal
        #[arg(long)]
        encrypt: bool,
    },
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or_else(|| config.storage.path.clone());
    let factory = config
        .key
        .factory()
        .context("Invalid key configuration")?;
    let agent = Agent::new(LocalStorage::new(store_path), factory);
    debug!(
        store = %agent.storage().path().display(),
        key = ?config.key,
        "Configuration loaded"
    );
    let defaults = &config.defaults;

    let mut stdout = io::stdout().lock();
    match cli.command {
        Commands::BuildCa { name } => {
            let name = name.unwrap_or_else(|| defaults.ca_common_name.clone());
            let certificate = agent
                .build_ca(&name)
                .with_context(|| format!("Failed to build CA '{name}'"))?;
            writeln!(stdout, "✓ Root CA {} created", certificate.subject())?;
        }
        Commands::BuildClientFull { name } => {
            let name = name.unwrap_or_else(|| defaults.client_common_name.clone());
            let certificate = agent
                .build_client_full(&name)
                .with_context(|| format!("Failed to build client certificate '{name}'"))?;
            writeln!(
                stdout,
                "✓ Client certificate {} issued (serial {})",
                certificate.subject(),
                certificate.serial_number_hex()?
            )?;
        }
        Commands::BuildServerFull { name } => {
            let name = name.unwrap_or_else(|| defaults.server_common_name.clone());
            let certificate = agent
                .build_server_full(&name)
                .with_context(|| format!("Failed to build server certificate '{name}'"))?;
            writeln!(
                stdout,
                "✓ Server certificate {} issued (serial {})",
                certificate.subject(),
                certificate.serial_number_hex()?
            )?;
        }
        Commands::ShowCa => {
            let pem = agent.show_ca().context("Failed to show CA")?;
            write!(stdout, "{pem}")?;
        }
        Commands::ShowCert { name } => {
            let pems = agent
                .show_cert(&name)
                .with_context(|| format!("Failed to show certificates for '{name}'"))?;
            for pem in pems {
                write!(stdout, "{pem}")?;
            }
        }
        Commands::ImportCa { cert, key } => {
            let cert_pem = fs::read(&cert)
                .with_context(|| format!("Failed to read certificate file {}", cert.display()))?;
            let key_pem = fs::read(&key)
                .with_context(|| format!("Failed to read key file {}", key.display()))?;
            let certificate = agent
                .import_ca(&cert_pem, &key_pem)
                .context("Failed to import CA")?;
            writeln!(stdout, "✓ Root CA {} imported", certificate.subject())?;
        }
        Commands::Revoke { serial } => {
            let entry = agent
                .revoke(&serial)
                .with_context(|| format!("Failed to revoke {serial}"))?;
            writeln!(stdout, "✓ Revoked {} {}", entry.serial_number, entry.subject)?;
        }
        Commands::ShowRevoked => {
            let entries = agent
                .show_revoked()
                .context("Failed to list revoked certificates")?;
            for entry in entries {
                writeln!(stdout, "{} {}", entry.serial_number, entry.subject)?;
            }
        }
        Commands::ExportKey { serial, encrypt } => {
            let password = if encrypt {
                let password = rpassword::prompt_password("Export password: ")
                    .context("Failed to read password")?;
                let confirm = rpassword::prompt_password("Confirm password: ")
                    .context("Failed to read password")?;
                if password != confirm {
                    anyhow::bail!("Passwords do not match");
                }
                Some(password)
            } else {
                None
            };

            let pem = agent
                .export_key(&serial, password.as_deref().map(str::as_bytes))
                .with_context(|| format!("Failed to export key for {serial}"))?;
            write!(stdout, "{pem}")?;
        }
    }

    Ok(())
}
