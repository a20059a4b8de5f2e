use serde::{Deserialize, Serialize};

use crate::{ArgonCost, passphrase::DEFAULT_PASSPHRASE_ITERATIONS};

fn default_passphrase_iterations() -> u32 {
    DEFAULT_PASSPHRASE_ITERATIONS
}

/// Tunables of the protection service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProtectionConfig {
    /// Argon2id cost for locking member keys under their password.
    #[serde(default)]
    pub member_key_cost: ArgonCost,
    /// PBKDF2 rounds for private keys exported with a passphrase.
    #[serde(default = "default_passphrase_iterations")]
    pub passphrase_iterations: u32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            member_key_cost: ArgonCost::default(),
            passphrase_iterations: DEFAULT_PASSPHRASE_ITERATIONS,
        }
    }
}
