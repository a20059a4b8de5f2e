use std::fmt::Debug;

use pkcs8::{EncodePrivateKey, PrivateKeyInfo};
use rsa::{
    BigUint, RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    traits::{PrivateKeyParts, PublicKeyParts},
};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("unsupported key type, only RSA keys with CRT parameters are accepted")]
    UnsupportedKeyType,
    #[error("private key is malformed or fails its consistency check")]
    Malformed,
    #[error("error encoding private key")]
    Encode,
}

/// A decoded RSA private key.
///
/// The key is owned by exactly one holder at a time and is scrubbed when
/// dropped.
#[derive(Clone)]
pub struct PrivateKeyMaterial(RsaPrivateKey);

impl Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyMaterial")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

impl PartialEq for PrivateKeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.0.n() == other.0.n()
            && self.0.e() == other.0.e()
            && self.0.d() == other.0.d()
            && self.0.primes() == other.0.primes()
    }
}

impl Eq for PrivateKeyMaterial {}

impl PrivateKeyMaterial {
    /// Accepts a key only if it is complete and self-consistent.
    pub fn from_rsa(key: RsaPrivateKey) -> Result<Self, KeyError> {
        let zero = BigUint::from(0u8);
        if *key.n() == zero || *key.e() == zero || *key.d() == zero {
            return Err(KeyError::Malformed);
        }

        let has_crt = key.primes().len() >= 2
            && key.dp().is_some()
            && key.dq().is_some()
            && key.qinv().is_some();
        if !has_crt {
            return Err(KeyError::UnsupportedKeyType);
        }

        key.validate().map_err(|_| KeyError::Malformed)?;

        Ok(Self(key))
    }

    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self, KeyError> {
        let key = RsaPrivateKey::from_pkcs1_der(der).map_err(|_| KeyError::Malformed)?;
        Self::from_rsa(key)
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyError> {
        let info = PrivateKeyInfo::try_from(der).map_err(|_| KeyError::Malformed)?;

        if info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
            return Err(KeyError::UnsupportedKeyType);
        }

        let key = RsaPrivateKey::try_from(info).map_err(|_| KeyError::Malformed)?;
        Self::from_rsa(key)
    }

    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let document = self.0.to_pkcs8_der().map_err(|_| KeyError::Encode)?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    pub fn modulus(&self) -> &BigUint {
        self.0.n()
    }

    pub fn public_exponent(&self) -> &BigUint {
        self.0.e()
    }

    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    pub(crate) fn as_rsa(&self) -> &RsaPrivateKey {
        &self.0
    }
}
