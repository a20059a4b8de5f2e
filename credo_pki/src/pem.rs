use std::fmt::Debug;

use pem::{EncodeConfig, LineEnding, Pem, PemError};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub(crate) const RSA_PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";
pub(crate) const PKCS8_PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
pub(crate) const EC_PRIVATE_KEY_TAG: &str = "EC PRIVATE KEY";
pub(crate) const ENCRYPTED_PRIVATE_KEY_TAG: &str = "ENCRYPTED PRIVATE KEY";
pub(crate) const CERTIFICATE_TAG: &str = "CERTIFICATE";
const X509_CERTIFICATE_TAG: &str = "X509 CERTIFICATE";

const PROC_TYPE_HEADER: &str = "Proc-Type";
const DEK_INFO_HEADER: &str = "DEK-Info";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no private keys or certificates found")]
    Empty,
    #[error("malformed PEM text: {0}")]
    Malformed(#[from] PemError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    PrivateKey,
    EncryptedPrivateKey,
    Certificate,
}

/// Encoding of an unencrypted private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pkcs1,
    Pkcs8,
    Sec1,
}

/// `DEK-Info` header of a legacy OpenSSL encrypted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DekInfo {
    pub algorithm: String,
    pub iv: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedKeyFormat {
    /// PKCS#8 `EncryptedPrivateKeyInfo`
    Pkcs8,
    /// PKCS#1 key encrypted the way `openssl rsa -aes256` does it
    Legacy(DekInfo),
}

/// One recognized object out of a PEM bundle.
#[derive(Clone, PartialEq, Eq)]
pub enum EncodedObject {
    PrivateKey {
        format: KeyFormat,
        der: Zeroizing<Vec<u8>>,
    },
    EncryptedPrivateKey {
        format: EncryptedKeyFormat,
        der: Vec<u8>,
    },
    Certificate {
        der: Vec<u8>,
    },
}

impl Debug for EncodedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodedObject::PrivateKey { format, .. } => f
                .debug_struct("PrivateKey")
                .field("format", format)
                .finish_non_exhaustive(),
            EncodedObject::EncryptedPrivateKey { format, der } => f
                .debug_struct("EncryptedPrivateKey")
                .field("format", format)
                .field("len", &der.len())
                .finish(),
            EncodedObject::Certificate { der } => f
                .debug_struct("Certificate")
                .field("len", &der.len())
                .finish(),
        }
    }
}

impl EncodedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            EncodedObject::PrivateKey { .. } => ObjectKind::PrivateKey,
            EncodedObject::EncryptedPrivateKey { .. } => ObjectKind::EncryptedPrivateKey,
            EncodedObject::Certificate { .. } => ObjectKind::Certificate,
        }
    }

    pub fn is_private_key(&self) -> bool {
        match self.kind() {
            ObjectKind::PrivateKey | ObjectKind::EncryptedPrivateKey => true,
            ObjectKind::Certificate => false,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            EncodedObject::PrivateKey { der, .. } => der,
            EncodedObject::EncryptedPrivateKey { der, .. } => der,
            EncodedObject::Certificate { der } => der,
        }
    }

    /// Header metadata of the object, only present for legacy encrypted keys.
    pub fn dek_info(&self) -> Option<&DekInfo> {
        match self {
            EncodedObject::EncryptedPrivateKey {
                format: EncryptedKeyFormat::Legacy(info),
                ..
            } => Some(info),
            _ => None,
        }
    }

    /// Re-encodes the object as PEM text.
    ///
    /// Legacy encrypted keys keep their `Proc-Type` and `DEK-Info` headers.
    pub fn to_pem(&self) -> String {
        let tag = match self {
            EncodedObject::PrivateKey { format, .. } => match format {
                KeyFormat::Pkcs1 => RSA_PRIVATE_KEY_TAG,
                KeyFormat::Pkcs8 => PKCS8_PRIVATE_KEY_TAG,
                KeyFormat::Sec1 => EC_PRIVATE_KEY_TAG,
            },
            EncodedObject::EncryptedPrivateKey { format, .. } => match format {
                EncryptedKeyFormat::Pkcs8 => ENCRYPTED_PRIVATE_KEY_TAG,
                EncryptedKeyFormat::Legacy(_) => RSA_PRIVATE_KEY_TAG,
            },
            EncodedObject::Certificate { .. } => CERTIFICATE_TAG,
        };

        let encoded = encode(&Pem::new(tag, self.payload().to_vec()));

        match self.dek_info() {
            Some(info) => {
                let headers = format!(
                    "-----\n{PROC_TYPE_HEADER}: 4,ENCRYPTED\n{DEK_INFO_HEADER}: {},{}\n\n",
                    info.algorithm,
                    hex::encode_upper(&info.iv)
                );
                encoded.replacen("-----\n", &headers, 1)
            }
            None => encoded,
        }
    }

    fn from_pem(pem: Pem) -> Option<Self> {
        let tag = pem.tag().to_owned();
        match tag.as_str() {
            RSA_PRIVATE_KEY_TAG => {
                if let Some(info) = legacy_encryption(&pem) {
                    Some(EncodedObject::EncryptedPrivateKey {
                        format: EncryptedKeyFormat::Legacy(info),
                        der: pem.into_contents(),
                    })
                } else {
                    Some(EncodedObject::PrivateKey {
                        format: KeyFormat::Pkcs1,
                        der: Zeroizing::new(pem.into_contents()),
                    })
                }
            }
            PKCS8_PRIVATE_KEY_TAG => Some(EncodedObject::PrivateKey {
                format: KeyFormat::Pkcs8,
                der: Zeroizing::new(pem.into_contents()),
            }),
            EC_PRIVATE_KEY_TAG => Some(EncodedObject::PrivateKey {
                format: KeyFormat::Sec1,
                der: Zeroizing::new(pem.into_contents()),
            }),
            ENCRYPTED_PRIVATE_KEY_TAG => Some(EncodedObject::EncryptedPrivateKey {
                format: EncryptedKeyFormat::Pkcs8,
                der: pem.into_contents(),
            }),
            CERTIFICATE_TAG | X509_CERTIFICATE_TAG => Some(EncodedObject::Certificate {
                der: pem.into_contents(),
            }),
            other => {
                info!("skipping unrecognized PEM object of type {other}");
                None
            }
        }
    }
}

fn legacy_encryption(pem: &Pem) -> Option<DekInfo> {
    let headers = pem.headers();
    let encrypted = headers
        .get(PROC_TYPE_HEADER)
        .is_some_and(|value| value.trim().ends_with("ENCRYPTED"));
    if !encrypted {
        return None;
    }

    // A missing or unreadable DEK-Info still marks the key as encrypted, the
    // decrypt step reports the unsupported algorithm.
    let dek_info = headers.get(DEK_INFO_HEADER).unwrap_or_default();
    let (algorithm, iv) = dek_info.split_once(',').unwrap_or((dek_info, ""));

    Some(DekInfo {
        algorithm: algorithm.trim().to_ascii_uppercase(),
        iv: hex::decode(iv.trim()).unwrap_or_default(),
    })
}

pub(crate) fn encode(pem: &Pem) -> String {
    let config = EncodeConfig::new().set_line_ending(LineEnding::LF);
    pem::encode_config(pem, config)
}

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";
const END_MARKER: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";

fn is_recognized(label: &[u8]) -> bool {
    std::str::from_utf8(label).is_ok_and(|label| {
        matches!(
            label,
            RSA_PRIVATE_KEY_TAG
                | PKCS8_PRIVATE_KEY_TAG
                | EC_PRIVATE_KEY_TAG
                | ENCRYPTED_PRIVATE_KEY_TAG
                | CERTIFICATE_TAG
                | X509_CERTIFICATE_TAG
        )
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}

/// Label and full text of every framed block, in bundle order.
///
/// A block ends at the first END line after its BEGIN line. An unterminated
/// block runs to the end of the input.
fn framed_blocks(data: &[u8]) -> Vec<(&[u8], &[u8])> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(begin) = find(data, BEGIN_MARKER, cursor) {
        let label_start = begin + BEGIN_MARKER.len();
        let Some(label_end) = find(data, DASHES, label_start) else {
            break;
        };
        let label = &data[label_start..label_end];

        let block_end = find(data, END_MARKER, label_end)
            .and_then(|end| find(data, DASHES, end + END_MARKER.len()))
            .map(|dashes| dashes + DASHES.len());

        match block_end {
            Some(block_end) => {
                blocks.push((label, &data[begin..block_end]));
                cursor = block_end;
            }
            None => {
                blocks.push((label, &data[begin..]));
                break;
            }
        }
    }

    blocks
}

/// Splits a PEM bundle into the private keys and certificates it contains.
///
/// Blocks with other labels are skipped without decoding their bodies, so
/// only key and certificate blocks have to be well formed.
pub fn parse(data: impl AsRef<[u8]>) -> Result<Vec<EncodedObject>, ParseError> {
    let mut objects = Vec::new();

    for (label, block) in framed_blocks(data.as_ref()) {
        if !is_recognized(label) {
            info!(
                "skipping unrecognized PEM object of type {}",
                String::from_utf8_lossy(label)
            );
            continue;
        }
        objects.extend(EncodedObject::from_pem(pem::parse(block)?));
    }

    if objects.is_empty() {
        return Err(ParseError::Empty);
    }

    debug!("parsed {} objects from bundle", objects.len());

    Ok(objects)
}
