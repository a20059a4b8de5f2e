use std::fmt::Debug;

use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    encrypt::{DecryptError, EncryptError, EncryptionAlgorithm, open, seal},
    envelope::{EnvelopeKind, WrapAlgorithm, WrappedKeyEnvelope},
    private_key::{KeyError, PrivateKeyMaterial},
};

const CHECK_VALUE: &[u8] = b"credo group key check v1";

#[derive(Debug, Error)]
pub enum GroupKeyError {
    #[error("error generating group key: {0}")]
    Generate(ring::error::Unspecified),
    #[error("error sealing with group key: {0}")]
    Encrypt(#[from] EncryptError),
    #[error("error opening with group key: {0}")]
    Decrypt(#[from] DecryptError),
    #[error("expected a {expected:?} envelope, got {found:?}")]
    WrongEnvelope {
        expected: EnvelopeKind,
        found: EnvelopeKind,
    },
    #[error("the group key check value does not match")]
    CheckMismatch,
    #[error("error decoding the unwrapped private key: {0}")]
    Key(#[from] KeyError),
}

/// The symmetric key all members of a group share.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupSecretKey([u8; 32]);

impl Debug for GroupSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GroupSecretKey(***)")
    }
}

impl GroupSecretKey {
    pub fn generate() -> Result<Self, GroupKeyError> {
        let mut key = [0u8; 32];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(GroupKeyError::Generate)?;
        Ok(Self(key))
    }

    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn seal(
        &self,
        kind: EnvelopeKind,
        plaintext: &[u8],
    ) -> Result<WrappedKeyEnvelope, GroupKeyError> {
        let (nonce, ciphertext) =
            seal(EncryptionAlgorithm::Aes256Gcm, &self.0, kind.aad(), plaintext)?;
        Ok(WrappedKeyEnvelope::symmetric(kind, nonce.to_vec(), ciphertext))
    }

    fn open(
        &self,
        kind: EnvelopeKind,
        envelope: &WrappedKeyEnvelope,
    ) -> Result<Zeroizing<Vec<u8>>, GroupKeyError> {
        if envelope.kind() != kind || envelope.algorithm() != WrapAlgorithm::Aes256Gcm {
            return Err(GroupKeyError::WrongEnvelope {
                expected: kind,
                found: envelope.kind(),
            });
        }

        Ok(open(
            EncryptionAlgorithm::Aes256Gcm,
            &self.0,
            envelope.nonce(),
            kind.aad(),
            envelope.ciphertext(),
        )?)
    }

    /// Seals the PKCS#8 encoding of `key`.
    pub fn wrap_private_key(
        &self,
        key: &PrivateKeyMaterial,
    ) -> Result<WrappedKeyEnvelope, GroupKeyError> {
        let der = key.to_pkcs8_der()?;
        self.seal(EnvelopeKind::PrivateKey, &der)
    }

    pub fn unwrap_private_key(
        &self,
        envelope: &WrappedKeyEnvelope,
    ) -> Result<PrivateKeyMaterial, GroupKeyError> {
        let der = self.open(EnvelopeKind::PrivateKey, envelope)?;
        Ok(PrivateKeyMaterial::from_pkcs8_der(&der)?)
    }

    /// Record published once per group, marking that the group has a key.
    pub fn check_value(&self) -> Result<WrappedKeyEnvelope, GroupKeyError> {
        self.seal(EnvelopeKind::GroupKeyCheck, CHECK_VALUE)
    }

    /// Succeeds iff `check` was produced by [`Self::check_value`] of this key.
    pub fn verify(&self, check: &WrappedKeyEnvelope) -> Result<(), GroupKeyError> {
        let value = self
            .open(EnvelopeKind::GroupKeyCheck, check)
            .map_err(|_| GroupKeyError::CheckMismatch)?;

        if value.as_slice() != CHECK_VALUE {
            return Err(GroupKeyError::CheckMismatch);
        }

        Ok(())
    }
}
