use std::fmt::Debug;

use ring::{
    aead::{AES_256_GCM, Aad, CHACHA20_POLY1305, LessSafeKey, NONCE_LEN, Nonce, UnboundKey},
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    Password,
    argon::{ArgonCost, ArgonParams, DeriveKeyError},
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    Chacha20Poly1305,
    Aes256Gcm,
}

impl From<EncryptionAlgorithm> for &'static ring::aead::Algorithm {
    fn from(value: EncryptionAlgorithm) -> Self {
        match value {
            EncryptionAlgorithm::Chacha20Poly1305 => &CHACHA20_POLY1305,
            EncryptionAlgorithm::Aes256Gcm => &AES_256_GCM,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    #[error("error deriving encryption key: {0}")]
    DeriveKeyError(#[from] DeriveKeyError),
    #[error("error loading key into ring: {0}")]
    CreateUnboundError(ring::error::Unspecified),
    #[error("error generating nonce: {0}")]
    NonceError(ring::error::Unspecified),
    #[error("error sealing data: {0}")]
    SealError(ring::error::Unspecified),
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("missing hash parameters in encrypted data")]
    MissingHashParameters,
    #[error("error deriving encryption key: {0}")]
    DeriveKeyError(#[from] DeriveKeyError),
    #[error("nonce has the wrong length")]
    InvalidNonce,
    #[error("error loading key into ring: {0}")]
    CreateUnboundError(ring::error::Unspecified),
    #[error("error decrypting data: {0}")]
    UnsealError(ring::error::Unspecified),
}

pub(crate) fn random_nonce() -> Result<[u8; NONCE_LEN], ring::error::Unspecified> {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new().fill(&mut nonce)?;
    Ok(nonce)
}

/// Seals `plaintext` under `key` with a fresh random nonce.
pub(crate) fn seal(
    alg: EncryptionAlgorithm,
    key: &[u8; 32],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), EncryptError> {
    let unbound = UnboundKey::new(alg.into(), key).map_err(EncryptError::CreateUnboundError)?;
    let sealing = LessSafeKey::new(unbound);

    let nonce = random_nonce().map_err(EncryptError::NonceError)?;

    let mut in_out = plaintext.to_owned();
    sealing
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(EncryptError::SealError)?;

    Ok((nonce, in_out))
}

pub(crate) fn open(
    alg: EncryptionAlgorithm,
    key: &[u8; 32],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| DecryptError::InvalidNonce)?;
    let unbound = UnboundKey::new(alg.into(), key).map_err(DecryptError::CreateUnboundError)?;
    let opening = LessSafeKey::new(unbound);

    let mut in_out = Zeroizing::new(ciphertext.to_owned());
    let cleartext_len = opening
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(DecryptError::UnsealError)?
        .len();

    in_out.truncate(cleartext_len);

    Ok(in_out)
}

static DEFAULT_ALG: EncryptionAlgorithm = EncryptionAlgorithm::Chacha20Poly1305;

/// Data sealed under a password (argon2 derived key) or a raw key.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    parameters: Option<ArgonParams>,
    alg: EncryptionAlgorithm,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Debug for EncryptedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedData")
            .field("alg", &self.alg)
            .field("parameters", &self.parameters)
            .field("len", &self.ciphertext.len())
            .finish()
    }
}

impl EncryptedData {
    pub fn encrypt_with_password(
        data: &[u8],
        password: &Password,
        cost: ArgonCost,
    ) -> Result<Self, EncryptError> {
        let parameters = ArgonParams::with_cost(cost);
        let encryption_key = parameters.derive_key(password)?;
        Self::encrypt_with_alg(data, &encryption_key, DEFAULT_ALG, Some(parameters))
    }

    pub fn encrypt_with_key(data: &[u8], encryption_key: &[u8; 32]) -> Result<Self, EncryptError> {
        Self::encrypt_with_alg(data, encryption_key, DEFAULT_ALG, None)
    }

    fn encrypt_with_alg(
        data: &[u8],
        encryption_key: &[u8; 32],
        alg: EncryptionAlgorithm,
        parameters: Option<ArgonParams>,
    ) -> Result<Self, EncryptError> {
        let (nonce, ciphertext) = seal(alg, encryption_key, &[], data)?;

        Ok(Self {
            parameters,
            alg,
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    pub fn decrypt_with_password(
        &self,
        password: &Password,
    ) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
        let parameters = self
            .parameters
            .as_ref()
            .ok_or(DecryptError::MissingHashParameters)?;

        let encryption_key = parameters.derive_key(password)?;

        self.decrypt_with_key(&encryption_key)
    }

    pub fn decrypt_with_key(
        &self,
        encryption_key: &[u8; 32],
    ) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
        open(self.alg, encryption_key, &self.nonce, &[], &self.ciphertext)
    }
}
