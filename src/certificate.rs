//! Certificate Policy Module
//!
//! Holds the certificate-type policy table, certificate signing requests, the
//! pre-certificate that the authority fills in before signing, and the issued
//! [`Certificate`] value.
//!
//! # Policy
//! ```text
//! type     CA     key usage                          ext key usage   validity
//! ca       true   keyCertSign, cRLSign               -               16y + 4d
//! server   false  digitalSignature, keyEncipherment  serverAuth      8y + 2d
//! client   false  digitalSignature                   clientAuth      4y + 1d
//! ```
//! The extra days account for leap years over the period.
//!
//! # Key Identifiers
//! The subject key identifier is the SHA-1 digest of the subject public key BIT STRING.
//! A self-signed certificate carries the same value as its authority key identifier. A
//! certificate chained to a parent copies the parent's *authority* key identifier, which
//! equals the parent's subject key identifier for roots built here but not necessarily for
//! imported ones.

use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1StringRef, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Extension, X509Name, X509NameRef, X509Ref, X509Req, X509};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PkiError, Result};
use crate::key::{public_key_bits, Key};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const X509_REQ_VERSION_1: i32 = 0;
const SERIAL_NUMBER_BITS: i32 = 128;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

const OID_AUTHORITY_KEY_IDENTIFIER: &str = "2.5.29.35";
// OBJECT IDENTIFIER 2.5.4.3
const OID_COMMON_NAME_DER: [u8; 5] = [0x06, 0x03, 0x55, 0x04, 0x03];
const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

/// The kind of certificate to issue; selects the policy applied at signing time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    Ca,
    Server,
    Client,
}

impl CertificateType {
    pub fn is_ca(self) -> bool {
        matches!(self, CertificateType::Ca)
    }

    /// Fixed validity period in days
    pub fn validity_days(self) -> u32 {
        match self {
            CertificateType::Ca => 16 * 365 + 4,
            CertificateType::Server => 8 * 365 + 2,
            CertificateType::Client => 4 * 365 + 1,
        }
    }

    fn basic_constraints(self) -> std::result::Result<X509Extension, openssl::error::ErrorStack> {
        let mut bc = BasicConstraints::new();
        bc.critical();
        if self.is_ca() {
            bc.ca();
        }
        bc.build()
    }

    fn key_usage(self) -> std::result::Result<X509Extension, openssl::error::ErrorStack> {
        let mut ku = KeyUsage::new();
        ku.critical();
        match self {
            CertificateType::Ca => {
                ku.key_cert_sign();
                ku.crl_sign();
            }
            CertificateType::Server => {
                ku.digital_signature();
                ku.key_encipherment();
            }
            CertificateType::Client => {
                ku.digital_signature();
            }
        }
        ku.build()
    }

    fn extended_key_usage(
        self,
    ) -> Option<std::result::Result<X509Extension, openssl::error::ErrorStack>> {
        match self {
            CertificateType::Ca => None,
            CertificateType::Server => Some(ExtendedKeyUsage::new().server_auth().build()),
            CertificateType::Client => Some(ExtendedKeyUsage::new().client_auth().build()),
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateType::Ca => "ca",
            CertificateType::Server => "server",
            CertificateType::Client => "client",
        })
    }
}

/// A certificate signing request binding a fresh public key to a common name
pub struct CertificateRequest {
    common_name: String,
    der: Vec<u8>,
    request: X509Req,
}

impl CertificateRequest {
    /// Build a request for `common_name`, signed by `key` as proof of possession
    pub fn new(common_name: &str, key: &Key) -> Result<Self> {
        let pkey = key.pkey()?;
        let der = (|| -> std::result::Result<Vec<u8>, openssl::error::ErrorStack> {
            let name = common_name_to_x509(common_name)?;
            let mut builder = X509Req::builder()?;
            builder.set_version(X509_REQ_VERSION_1)?;
            builder.set_subject_name(&name)?;
            builder.set_pubkey(&pkey)?;
            builder.sign(&pkey, key.signing_digest())?;
            builder.build().to_der()
        })()
        .map_err(|e| PkiError::certificate_build("failed to create certificate request", e))?;

        let request = X509Req::from_der(&der)
            .map_err(|e| PkiError::certificate_build("failed to parse certificate request", e))?;

        Ok(Self {
            common_name: common_name.to_string(),
            der,
            request,
        })
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn subject_name(&self) -> &X509NameRef {
        self.request.subject_name()
    }

    pub fn public_key(&self) -> Result<PKey<Public>> {
        self.request
            .public_key()
            .map_err(|e| PkiError::certificate_build("certificate request has no public key", e))
    }

    /// Raw DER of the signed request
    pub fn to_der(&self) -> &[u8] {
        &self.der
    }
}

/// Where the issuer name and authority key identifier of a new certificate come from
pub(crate) enum Issuer<'a> {
    /// The certificate being built is its own issuer
    SelfSigned,
    /// An existing CA certificate
    Parent(&'a X509Ref),
}

/// Everything policy decides about a certificate before it is signed
pub(crate) struct PreCertificate {
    cert_type: CertificateType,
    serial: BigNum,
    not_before: Asn1Time,
    not_after: Asn1Time,
    authority_key_id: Option<Vec<u8>>,
}

impl PreCertificate {
    pub(crate) fn prepare(
        cert_type: CertificateType,
        request: &CertificateRequest,
        issuer: &Issuer<'_>,
    ) -> Result<Self> {
        let serial = random_serial()?;

        let public_key = request.public_key()?;
        let authority_key_id = match issuer {
            // Same digest OpenSSL uses for the subject key identifier
            Issuer::SelfSigned => Some(openssl::sha::sha1(&public_key_bits(&public_key)?).to_vec()),
            Issuer::Parent(parent) => parent
                .authority_key_id()
                .or_else(|| parent.subject_key_id())
                .map(|id| id.as_slice().to_vec()),
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| PkiError::invalid_certificate("system clock is before the epoch"))?
            .as_secs() as i64;
        let expiry = now + i64::from(cert_type.validity_days()) * SECONDS_PER_DAY;
        let not_before = Asn1Time::from_unix(now as _)
            .map_err(|e| PkiError::certificate_build("failed to create not_before", e))?;
        let not_after = Asn1Time::from_unix(expiry as _)
            .map_err(|e| PkiError::certificate_build("failed to create not_after", e))?;

        Ok(Self {
            cert_type,
            serial,
            not_before,
            not_after,
            authority_key_id,
        })
    }

    /// Sign into a DER certificate with `signing_key`
    pub(crate) fn sign(
        self,
        request: &CertificateRequest,
        issuer: &Issuer<'_>,
        signing_key: &Key,
    ) -> Result<Vec<u8>> {
        let public_key = request.public_key()?;
        let signing_pkey = signing_key.pkey()?;
        let (issuer_name, issuer_x509) = match issuer {
            Issuer::SelfSigned => (request.subject_name(), None),
            Issuer::Parent(parent) => (parent.subject_name(), Some(*parent)),
        };

        (|| -> std::result::Result<Vec<u8>, openssl::error::ErrorStack> {
            let mut builder = X509::builder()?;
            builder.set_version(X509_VERSION_3)?;
            let serial = self.serial.to_asn1_integer()?;
            builder.set_serial_number(&serial)?;
            builder.set_subject_name(request.subject_name())?;
            builder.set_issuer_name(issuer_name)?;
            builder.set_not_before(&self.not_before)?;
            builder.set_not_after(&self.not_after)?;
            builder.set_pubkey(&public_key)?;

            builder.append_extension(self.cert_type.basic_constraints()?)?;
            builder.append_extension(self.cert_type.key_usage()?)?;
            if let Some(eku) = self.cert_type.extended_key_usage() {
                builder.append_extension(eku?)?;
            }
            let subject_key_id = SubjectKeyIdentifier::new()
                .build(&builder.x509v3_context(issuer_x509, None))?;
            builder.append_extension(subject_key_id)?;
            if let Some(aki) = &self.authority_key_id {
                builder.append_extension(authority_key_identifier(aki)?)?;
            }

            builder.sign(&signing_pkey, signing_key.signing_digest())?;
            builder.build().to_der()
        })()
        .map_err(|e| {
            PkiError::certificate_build(format!("failed to sign {} certificate", self.cert_type), e)
        })
    }
}

/// An issued X.509 certificate
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
    subject: String,
    issuer: String,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let x509 = X509::from_der(der)
            .map_err(|e| PkiError::certificate_build("failed to parse DER certificate", e))?;
        Self::from_x509(x509)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let x509 = X509::from_pem(pem)
            .map_err(|e| PkiError::certificate_build("failed to parse PEM certificate", e))?;
        Self::from_x509(x509)
    }

    fn from_x509(x509: X509) -> Result<Self> {
        let subject = render_name(x509.subject_name())?;
        let issuer = render_name(x509.issuer_name())?;
        Ok(Self {
            x509,
            subject,
            issuer,
        })
    }

    pub fn x509(&self) -> &X509Ref {
        &self.x509
    }

    /// Serial number as lowercase hex of its minimal big-endian bytes
    pub fn serial_number_hex(&self) -> Result<String> {
        let bn = self
            .x509
            .serial_number()
            .to_bn()
            .map_err(|e| PkiError::certificate_build("failed to read serial number", e))?;
        Ok(hex::encode(bn.to_vec()))
    }

    /// Subject distinguished name rendered as `CN=...` (see [`render_name`])
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// First common name of the subject, if any
    pub fn common_name(&self) -> Result<Option<String>> {
        self.x509
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .map(|entry| name_value(entry.data()))
            .transpose()
    }

    pub fn subject_key_id(&self) -> Option<Vec<u8>> {
        self.x509.subject_key_id().map(|id| id.as_slice().to_vec())
    }

    pub fn authority_key_id(&self) -> Option<Vec<u8>> {
        self.x509.authority_key_id().map(|id| id.as_slice().to_vec())
    }

    pub fn public_key(&self) -> Result<PKey<Public>> {
        self.x509
            .public_key()
            .map_err(|e| PkiError::certificate_build("certificate has no public key", e))
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.x509
            .to_der()
            .map_err(|e| PkiError::certificate_build("failed to encode certificate", e))
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        self.x509
            .to_pem()
            .map_err(|e| PkiError::certificate_build("failed to PEM-encode certificate", e))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Render a distinguished name the way the record store indexes subjects.
///
/// Entries appear in reverse order, each as `SHORTNAME=value`, joined with `,`.
pub fn render_name(name: &X509NameRef) -> Result<String> {
    let mut parts = name
        .entries()
        .map(|entry| {
            let key = entry
                .object()
                .nid()
                .short_name()
                .map(str::to_string)
                .unwrap_or_else(|_| entry.object().to_string());
            let value = name_value(entry.data())?;
            Ok(format!("{key}={}", escape_name_value(&value)))
        })
        .collect::<Result<Vec<String>>>()?;
    parts.reverse();
    Ok(parts.join(","))
}

fn name_value(data: &Asn1StringRef) -> Result<String> {
    data.to_string()
        .map_err(|e| PkiError::certificate_build("failed to decode name attribute", e))
}

fn escape_name_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let leading = i == 0 && (c == ' ' || c == '#');
        let trailing = i == last && c == ' ';
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';') || leading || trailing {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Encode `CN=<common_name>` directly, without the length bounds `X509NameBuilder` enforces.
///
/// An empty common name yields an empty subject.
fn common_name_to_x509(common_name: &str) -> std::result::Result<X509Name, openssl::error::ErrorStack> {
    let mut rdns = Vec::new();
    if !common_name.is_empty() {
        let mut attribute = OID_COMMON_NAME_DER.to_vec();
        attribute.extend(der_wrap(TAG_UTF8_STRING, common_name.as_bytes()));
        rdns = der_wrap(TAG_SET, &der_wrap(TAG_SEQUENCE, &attribute));
    }
    X509Name::from_der(&der_wrap(TAG_SEQUENCE, &rdns))
}

/// 16 bytes from the CSPRNG as an unsigned integer
fn random_serial() -> Result<BigNum> {
    let mut serial = BigNum::new()
        .map_err(|e| PkiError::certificate_build("failed to allocate serial number", e))?;
    serial
        .rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)
        .map_err(|e| PkiError::certificate_build("failed to generate serial number", e))?;
    Ok(serial)
}

fn authority_key_identifier(
    key_id: &[u8],
) -> std::result::Result<X509Extension, openssl::error::ErrorStack> {
    // AuthorityKeyIdentifier ::= SEQUENCE { keyIdentifier [0] IMPLICIT KeyIdentifier }
    let der = der_wrap(0x30, &der_wrap(0x80, key_id));
    raw_extension(OID_AUTHORITY_KEY_IDENTIFIER, &der)
}

fn raw_extension(
    oid: &str,
    der: &[u8],
) -> std::result::Result<X509Extension, openssl::error::ErrorStack> {
    let object = Asn1Object::from_str(oid)?;
    let contents = Asn1OctetString::new_from_bytes(der)?;
    X509Extension::new_from_der(&object, false, &contents)
}

fn der_wrap(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut der = vec![tag];
    der.extend(der_length(contents.len()));
    der.extend_from_slice(contents);
    der
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();
    let mut encoded = vec![0x80 | bytes.len() as u8];
    encoded.extend(bytes);
    encoded
}
