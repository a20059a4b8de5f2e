use argon2::{Argon2, Params};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::Password;

/// Argon2id cost parameters used to stretch member passwords.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArgonCost {
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
}

impl ArgonCost {
    pub fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }

    pub fn strong() -> Self {
        Self {
            m_cost: 128 * 1024,
            t_cost: 2,
            p_cost: 8,
        }
    }

    pub fn basic() -> Self {
        Self {
            m_cost: 32 * 1024,
            t_cost: 2,
            p_cost: 4,
        }
    }

    fn get_params(&self) -> Result<Params, DeriveKeyError> {
        Params::new(self.m_cost, self.t_cost, self.p_cost, None)
            .map_err(DeriveKeyError::InvalidCost)
    }

    fn get_argon_hasher<'a>(&self) -> Result<Argon2<'a>, DeriveKeyError> {
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.get_params()?,
        ))
    }
}

impl Default for ArgonCost {
    fn default() -> Self {
        Self::basic()
    }
}

#[derive(Debug, Error)]
pub enum DeriveKeyError {
    #[error("invalid argon2 cost parameters: {0}")]
    InvalidCost(argon2::Error),
    #[error("error hashing password: {0}")]
    HashError(argon2::Error),
}

/// Cost and salt of one password derivation, stored next to the
/// ciphertext so the key can be derived again.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArgonParams {
    cost: ArgonCost,
    salt: Vec<u8>,
}

impl ArgonParams {
    fn random_salt() -> Vec<u8> {
        rand::rng()
            .sample_iter(rand::distr::StandardUniform)
            .take(32)
            .collect()
    }

    pub fn with_cost(cost: ArgonCost) -> Self {
        Self {
            cost,
            salt: Self::random_salt(),
        }
    }

    pub fn derive_key(&self, password: &Password) -> Result<Zeroizing<[u8; 32]>, DeriveKeyError> {
        let argon = self.cost.get_argon_hasher()?;

        let mut key = Zeroizing::new([0u8; 32]);
        argon
            .hash_password_into(password.as_bytes(), &self.salt, &mut key[..])
            .map_err(DeriveKeyError::HashError)?;

        Ok(key)
    }
}
