use std::fmt::Debug;

use pem::Pem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pem::encode;

const WRAPPED_PRIVATE_KEY_TAG: &str = "WRAPPED PRIVATE KEY";
const WRAPPED_GROUP_KEY_TAG: &str = "WRAPPED GROUP KEY";
const GROUP_KEY_CHECK_TAG: &str = "GROUP KEY CHECK";

/// What an envelope holds and under which key.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// A credential private key under a group secret key.
    PrivateKey,
    /// A group secret key under a member key.
    GroupKey,
    /// A fixed value under a group secret key, used to recognize the
    /// group's current key.
    GroupKeyCheck,
}

impl EnvelopeKind {
    fn pem_tag(self) -> &'static str {
        match self {
            EnvelopeKind::PrivateKey => WRAPPED_PRIVATE_KEY_TAG,
            EnvelopeKind::GroupKey => WRAPPED_GROUP_KEY_TAG,
            EnvelopeKind::GroupKeyCheck => GROUP_KEY_CHECK_TAG,
        }
    }

    fn from_pem_tag(tag: &str) -> Option<Self> {
        match tag {
            WRAPPED_PRIVATE_KEY_TAG => Some(EnvelopeKind::PrivateKey),
            WRAPPED_GROUP_KEY_TAG => Some(EnvelopeKind::GroupKey),
            GROUP_KEY_CHECK_TAG => Some(EnvelopeKind::GroupKeyCheck),
            _ => None,
        }
    }

    /// Associated data binding ciphertexts to their kind.
    pub(crate) fn aad(self) -> &'static [u8] {
        self.pem_tag().as_bytes()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapAlgorithm {
    /// AES-256-GCM with a random 96 bit nonce.
    Aes256Gcm,
    /// HPKE base mode, X25519-HKDF-SHA256, HKDF-SHA512, ChaCha20-Poly1305.
    HpkeX25519ChaCha20Poly1305,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("error encoding envelope: {0}")]
    Encode(postcard::Error),
    #[error("error decoding envelope: {0}")]
    Decode(postcard::Error),
    #[error("malformed PEM text: {0}")]
    Pem(#[from] pem::PemError),
    #[error("unexpected PEM object {0}")]
    UnexpectedTag(String),
    #[error("PEM label does not match the envelope kind {0:?}")]
    KindMismatch(EnvelopeKind),
}

/// Self describing ciphertext of a wrapped key.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WrappedKeyEnvelope {
    kind: EnvelopeKind,
    alg: WrapAlgorithm,
    nonce: Vec<u8>,
    encapsulated_key: Option<Vec<u8>>,
    ciphertext: Vec<u8>,
}

impl Debug for WrappedKeyEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedKeyEnvelope")
            .field("kind", &self.kind)
            .field("alg", &self.alg)
            .field("len", &self.ciphertext.len())
            .finish()
    }
}

impl WrappedKeyEnvelope {
    pub(crate) fn symmetric(kind: EnvelopeKind, nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            kind,
            alg: WrapAlgorithm::Aes256Gcm,
            nonce,
            encapsulated_key: None,
            ciphertext,
        }
    }

    pub(crate) fn hpke(kind: EnvelopeKind, encapsulated_key: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            kind,
            alg: WrapAlgorithm::HpkeX25519ChaCha20Poly1305,
            nonce: Vec::new(),
            encapsulated_key: Some(encapsulated_key),
            ciphertext,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn algorithm(&self) -> WrapAlgorithm {
        self.alg
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub(crate) fn encapsulated_key(&self) -> Option<&[u8]> {
        self.encapsulated_key.as_deref()
    }

    pub(crate) fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        postcard::to_allocvec(self).map_err(EnvelopeError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        postcard::from_bytes(bytes).map_err(EnvelopeError::Decode)
    }

    pub fn to_pem(&self) -> Result<String, EnvelopeError> {
        Ok(encode(&Pem::new(self.kind.pem_tag(), self.to_bytes()?)))
    }

    pub fn from_pem(text: impl AsRef<[u8]>) -> Result<Self, EnvelopeError> {
        let pem = pem::parse(text)?;
        let kind = EnvelopeKind::from_pem_tag(pem.tag())
            .ok_or_else(|| EnvelopeError::UnexpectedTag(pem.tag().to_owned()))?;

        let envelope = Self::from_bytes(pem.contents())?;
        if envelope.kind != kind {
            return Err(EnvelopeError::KindMismatch(envelope.kind));
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod test {
    use super::{EnvelopeError, EnvelopeKind, WrapAlgorithm, WrappedKeyEnvelope};

    fn sample(kind: EnvelopeKind) -> WrappedKeyEnvelope {
        WrappedKeyEnvelope::symmetric(kind, vec![1; 12], vec![2; 48])
    }

    #[test]
    fn pem_labels_follow_kind() {
        let cases = [
            (EnvelopeKind::PrivateKey, "WRAPPED PRIVATE KEY"),
            (EnvelopeKind::GroupKey, "WRAPPED GROUP KEY"),
            (EnvelopeKind::GroupKeyCheck, "GROUP KEY CHECK"),
        ];

        for (kind, label) in cases {
            let envelope = sample(kind);
            let text = envelope.to_pem().unwrap();
            assert!(text.starts_with(&format!("-----BEGIN {label}-----")));
            assert_eq!(WrappedKeyEnvelope::from_pem(&text).unwrap(), envelope);
        }
    }

    #[test]
    fn rejects_mislabeled_pem() {
        let text = sample(EnvelopeKind::GroupKey)
            .to_pem()
            .unwrap()
            .replace("WRAPPED GROUP KEY", "WRAPPED PRIVATE KEY");

        assert!(matches!(
            WrappedKeyEnvelope::from_pem(text),
            Err(EnvelopeError::KindMismatch(EnvelopeKind::GroupKey))
        ));

        let text = sample(EnvelopeKind::GroupKey)
            .to_pem()
            .unwrap()
            .replace("WRAPPED GROUP KEY", "CERTIFICATE");
        assert!(matches!(
            WrappedKeyEnvelope::from_pem(text),
            Err(EnvelopeError::UnexpectedTag(_))
        ));
    }

    #[test]
    fn hpke_envelope_keeps_encapsulated_key() {
        let envelope = WrappedKeyEnvelope::hpke(EnvelopeKind::GroupKey, vec![3; 32], vec![4; 48]);
        let decoded = WrappedKeyEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.algorithm(), WrapAlgorithm::HpkeX25519ChaCha20Poly1305);
        assert_eq!(decoded.encapsulated_key(), Some(&[3u8; 32][..]));
        assert!(decoded.nonce().is_empty());
    }

    #[test]
    fn truncated_bytes_fail() {
        let bytes = sample(EnvelopeKind::PrivateKey).to_bytes().unwrap();
        assert!(WrappedKeyEnvelope::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}
