use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use rsa::BigUint;
use serde::de::Visitor;
use serde::{Deserialize, Serialize, de};
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::error::X509Error;
use x509_parser::public_key::PublicKey;
use x509_parser::{certificate::X509Certificate, oid_registry::asn1_rs::FromDer};

#[derive(Error, Debug)]
pub enum CertificateParseError {
    #[error("X509 Parser Error: {0}")]
    X509ParserError(#[from] x509_parser::nom::Err<X509Error>),
    #[error("X509 Error: {0}")]
    X509Error(#[from] X509Error),
    #[error("trailing data after certificate")]
    TrailingData,
}

/// Public RSA parameters of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicParameters {
    pub modulus: BigUint,
    pub exponent: BigUint,
}

#[derive(Debug)]
pub struct CertificateData {
    der: Vec<u8>,
    subject: String,
    subject_der: Vec<u8>,
    issuer: String,
    issuer_der: Vec<u8>,
    common_name: Option<String>,
    serial: String,
    rsa_public_key: Option<RsaPublicParameters>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

/// A parsed X.509 certificate out of an uploaded bundle.
///
/// Nothing about the certificate is trusted. Two records are equal iff
/// their DER encodings are.
#[derive(Clone)]
pub struct CertificateRecord {
    data: Arc<CertificateData>,
}

impl Deref for CertificateRecord {
    type Target = CertificateData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Debug for CertificateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .finish()
    }
}

impl CertificateRecord {
    pub fn from_der(der: Vec<u8>) -> Result<Self, CertificateParseError> {
        let (rest, cert) = X509Certificate::from_der(der.as_ref())?;
        if !rest.is_empty() {
            return Err(CertificateParseError::TrailingData);
        }

        let rsa_public_key = match cert.public_key().parsed()? {
            PublicKey::RSA(key) => Some(RsaPublicParameters {
                modulus: BigUint::from_bytes_be(key.modulus),
                exponent: BigUint::from_bytes_be(key.exponent),
            }),
            _ => None,
        };

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_owned);

        let validity = cert.validity();

        let data = CertificateData {
            subject: cert.subject().to_string(),
            subject_der: cert.subject().as_raw().to_vec(),
            issuer: cert.issuer().to_string(),
            issuer_der: cert.issuer().as_raw().to_vec(),
            common_name,
            serial: hex::encode_upper(cert.raw_serial()),
            rsa_public_key,
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
            der,
        };

        Ok(Self {
            data: Arc::new(data),
        })
    }
}

impl CertificateData {
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Common name of the subject, if it has one.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Upper case hex of the serial number bytes.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// `None` for certificates with a non-RSA key.
    pub fn rsa_public_key(&self) -> Option<&RsaPublicParameters> {
        self.rsa_public_key.as_ref()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.not_after < now
    }

    /// Names are compared on their DER encoding.
    pub fn is_self_signed(&self) -> bool {
        self.subject_der == self.issuer_der
    }

    pub fn is_issued_by(&self, issuer: &CertificateData) -> bool {
        self.issuer_der == issuer.subject_der
    }
}

impl PartialEq for CertificateRecord {
    fn eq(&self, other: &Self) -> bool {
        self.as_der() == other.as_der()
    }
}

impl Eq for CertificateRecord {}

impl Hash for CertificateRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_der().hash(state);
    }
}

impl Ord for CertificateRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_der().cmp(other.as_der())
    }
}

impl PartialOrd for CertificateRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for CertificateRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.as_der())
    }
}

impl<'de> Deserialize<'de> for CertificateRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_byte_buf(CertificateVisitor)
    }
}

struct CertificateVisitor;

impl<'de> Visitor<'de> for CertificateVisitor {
    type Value = CertificateRecord;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a der encoded certificate")
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        CertificateRecord::from_der(v).map_err(de::Error::custom)
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.visit_byte_buf(v.to_vec())
    }

    // self describing formats like json hand the bytes over as a sequence
    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut der = Vec::with_capacity(seq.size_hint().unwrap_or_default());
        while let Some(byte) = seq.next_element::<u8>()? {
            der.push(byte);
        }

        self.visit_byte_buf(der)
    }
}
