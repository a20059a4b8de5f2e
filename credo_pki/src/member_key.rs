use std::fmt::Debug;

use hpke::{Deserializable, HpkeError, Serializable, kem::Kem as _};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    ArgonCost, DecryptError, EncryptError, EncryptedData, Password,
    envelope::{EnvelopeKind, WrapAlgorithm, WrappedKeyEnvelope},
    group_key::GroupSecretKey,
};

/// ciphersuite for HPKE used for sharing group keys with members
type Kem = hpke::kem::X25519HkdfSha256;
type Aead = hpke::aead::ChaCha20Poly1305;
type Kdf = hpke::kdf::HkdfSha512;

type KemPrivateKey = <Kem as hpke::kem::Kem>::PrivateKey;
type KemPublicKey = <Kem as hpke::kem::Kem>::PublicKey;
type KemEncappedKey = <Kem as hpke::kem::Kem>::EncappedKey;

#[derive(Error, Debug)]
pub enum MemberKeyError {
    #[error("error locking member key: {0}")]
    Encrypt(#[from] EncryptError),
    #[error("error unlocking member key: {0}")]
    Decrypt(#[from] DecryptError),
    #[error("HPKE error: {0}")]
    Hpke(HpkeError),
    #[error("expected a wrapped group key, got {0:?}")]
    WrongEnvelope(EnvelopeKind),
    #[error("decoded group key has the wrong length")]
    InvalidKeyLength,
    #[error("error encoding member key: {0}")]
    Encode(postcard::Error),
    #[error("error decoding member key: {0}")]
    Decode(postcard::Error),
}

impl From<HpkeError> for MemberKeyError {
    fn from(error: HpkeError) -> Self {
        Self::Hpke(error)
    }
}

/// Context binding a wrapped group key to its group and member.
fn binding(group: &str, login: &str) -> Vec<u8> {
    let mut info = Vec::with_capacity(group.len() + login.len() + 24);
    info.extend_from_slice(b"credo group key");
    for part in [group, login] {
        info.extend_from_slice(&(part.len() as u32).to_be_bytes());
        info.extend_from_slice(part.as_bytes());
    }
    info
}

/// Public half of a member key. Anyone holding it can grant the member
/// access to a group.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemberPublicKey(Vec<u8>);

impl Debug for MemberPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemberPublicKey({})", hex::encode(&self.0))
    }
}

impl MemberPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wraps `key` so only the holder of the matching private key can open
    /// it, and only for this group and login.
    pub fn wrap_group_key(
        &self,
        key: &GroupSecretKey,
        group: &str,
        login: &str,
    ) -> Result<WrappedKeyEnvelope, MemberKeyError> {
        let public_key = KemPublicKey::from_bytes(&self.0)?;

        // random generator for hpke
        let mut csprng = StdRng::from_os_rng();

        let (encapsulated_key, ciphertext) = hpke::single_shot_seal::<Aead, Kdf, Kem, _>(
            &hpke::OpModeS::Base,
            &public_key,
            &binding(group, login),
            key.as_bytes(),
            EnvelopeKind::GroupKey.aad(),
            &mut csprng,
        )?;

        Ok(WrappedKeyEnvelope::hpke(
            EnvelopeKind::GroupKey,
            encapsulated_key.to_bytes().to_vec(),
            ciphertext,
        ))
    }
}

/// A member's personal key encryption key.
pub struct MemberKeyPair {
    private_key: KemPrivateKey,
    public_key: MemberPublicKey,
}

impl Debug for MemberKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberKeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl MemberKeyPair {
    pub fn generate() -> Self {
        let mut csprng = StdRng::from_os_rng();
        let (private_key, public_key) = Kem::gen_keypair(&mut csprng);

        Self {
            private_key,
            public_key: MemberPublicKey(public_key.to_bytes().to_vec()),
        }
    }

    pub fn public_key(&self) -> &MemberPublicKey {
        &self.public_key
    }

    /// Seals the private half with a key derived from `password`.
    pub fn lock(
        &self,
        password: &Password,
        cost: ArgonCost,
    ) -> Result<LockedMemberKey, MemberKeyError> {
        let private_key = Zeroizing::new(self.private_key.to_bytes().to_vec());
        let sealed = EncryptedData::encrypt_with_password(&private_key, password, cost)?;

        Ok(LockedMemberKey {
            public_key: self.public_key.clone(),
            private_key: sealed,
        })
    }

    pub fn unwrap_group_key(
        &self,
        envelope: &WrappedKeyEnvelope,
        group: &str,
        login: &str,
    ) -> Result<GroupSecretKey, MemberKeyError> {
        if envelope.kind() != EnvelopeKind::GroupKey
            || envelope.algorithm() != WrapAlgorithm::HpkeX25519ChaCha20Poly1305
        {
            return Err(MemberKeyError::WrongEnvelope(envelope.kind()));
        }

        let encapsulated_key = KemEncappedKey::from_bytes(
            envelope
                .encapsulated_key()
                .ok_or(MemberKeyError::WrongEnvelope(envelope.kind()))?,
        )?;

        let key = Zeroizing::new(hpke::single_shot_open::<Aead, Kdf, Kem>(
            &hpke::OpModeR::Base,
            &self.private_key,
            &encapsulated_key,
            &binding(group, login),
            envelope.ciphertext(),
            EnvelopeKind::GroupKey.aad(),
        )?);

        let key: [u8; 32] = key
            .as_slice()
            .try_into()
            .map_err(|_| MemberKeyError::InvalidKeyLength)?;

        Ok(GroupSecretKey::from_bytes(key))
    }
}

/// A member key at rest: the public half in the clear, the private half
/// sealed under the member's password.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LockedMemberKey {
    public_key: MemberPublicKey,
    private_key: EncryptedData,
}

impl LockedMemberKey {
    pub fn public_key(&self) -> &MemberPublicKey {
        &self.public_key
    }

    pub fn unlock(&self, password: &Password) -> Result<MemberKeyPair, MemberKeyError> {
        let private_key = self.private_key.decrypt_with_password(password)?;
        let private_key = KemPrivateKey::from_bytes(&private_key)?;

        Ok(MemberKeyPair {
            private_key,
            public_key: self.public_key.clone(),
        })
    }

    /// Re-seals the private half under `new`. The key pair itself stays the
    /// same, so existing group key copies remain usable.
    pub fn change_password(
        &self,
        old: &Password,
        new: &Password,
        cost: ArgonCost,
    ) -> Result<LockedMemberKey, MemberKeyError> {
        let keypair = self.unlock(old)?;
        debug!("re-locking member key under a new password");
        keypair.lock(new, cost)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MemberKeyError> {
        postcard::to_allocvec(self).map_err(MemberKeyError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MemberKeyError> {
        postcard::from_bytes(bytes).map_err(MemberKeyError::Decode)
    }
}

#[cfg(test)]
mod test {
    use super::{LockedMemberKey, MemberKeyError, MemberKeyPair};
    use crate::{Password, argon::ArgonCost, envelope::EnvelopeKind, group_key::GroupSecretKey};

    fn cheap() -> ArgonCost {
        ArgonCost::new(1024, 1, 1)
    }

    #[test]
    fn lock_unlock() {
        let keypair = MemberKeyPair::generate();
        let locked = keypair.lock(&Password::from("pw"), cheap()).unwrap();

        let unlocked = locked.unlock(&Password::from("pw")).unwrap();
        assert_eq!(unlocked.public_key(), keypair.public_key());

        assert!(matches!(
            locked.unlock(&Password::from("not pw")),
            Err(MemberKeyError::Decrypt(_))
        ));
    }

    #[test]
    fn group_key_roundtrip() {
        let keypair = MemberKeyPair::generate();
        let group_key = GroupSecretKey::generate().unwrap();

        let wrapped = keypair
            .public_key()
            .wrap_group_key(&group_key, "finance", "alice")
            .unwrap();
        assert_eq!(wrapped.kind(), EnvelopeKind::GroupKey);

        let unwrapped = keypair.unwrap_group_key(&wrapped, "finance", "alice").unwrap();
        assert_eq!(unwrapped.as_bytes(), group_key.as_bytes());
    }

    #[test]
    fn wrapped_key_is_bound_to_group_and_login() {
        let keypair = MemberKeyPair::generate();
        let group_key = GroupSecretKey::generate().unwrap();
        let wrapped = keypair
            .public_key()
            .wrap_group_key(&group_key, "finance", "alice")
            .unwrap();

        assert!(keypair.unwrap_group_key(&wrapped, "hr", "alice").is_err());
        assert!(keypair.unwrap_group_key(&wrapped, "finance", "bob").is_err());
        // length prefixes keep the fields apart
        assert!(keypair.unwrap_group_key(&wrapped, "financ", "ealice").is_err());
    }

    #[test]
    fn other_member_cannot_unwrap() {
        let alice = MemberKeyPair::generate();
        let bob = MemberKeyPair::generate();
        let wrapped = alice
            .public_key()
            .wrap_group_key(&GroupSecretKey::generate().unwrap(), "finance", "alice")
            .unwrap();

        assert!(matches!(
            bob.unwrap_group_key(&wrapped, "finance", "alice"),
            Err(MemberKeyError::Hpke(_))
        ));
    }

    #[test]
    fn change_password_keeps_key() {
        let keypair = MemberKeyPair::generate();
        let group_key = GroupSecretKey::generate().unwrap();
        let wrapped = keypair
            .public_key()
            .wrap_group_key(&group_key, "finance", "alice")
            .unwrap();

        let locked = keypair.lock(&Password::from("old"), cheap()).unwrap();
        let relocked = locked
            .change_password(&Password::from("old"), &Password::from("new"), cheap())
            .unwrap();

        assert!(relocked.unlock(&Password::from("old")).is_err());
        let unlocked = relocked.unlock(&Password::from("new")).unwrap();
        let unwrapped = unlocked.unwrap_group_key(&wrapped, "finance", "alice").unwrap();
        assert_eq!(unwrapped.as_bytes(), group_key.as_bytes());

        assert!(
            locked
                .change_password(&Password::from("wrong"), &Password::from("new"), cheap())
                .is_err()
        );
    }

    #[test]
    fn locked_key_bytes() {
        let locked = MemberKeyPair::generate()
            .lock(&Password::from("pw"), cheap())
            .unwrap();

        let decoded = LockedMemberKey::from_bytes(&locked.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.public_key(), locked.public_key());
        assert!(decoded.unlock(&Password::from("pw")).is_ok());
    }
}
