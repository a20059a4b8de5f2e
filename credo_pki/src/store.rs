use thiserror::Error;

use crate::{
    Password,
    envelope::WrappedKeyEnvelope,
    member_key::{LockedMemberKey, MemberKeyError, MemberKeyPair, MemberPublicKey},
};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no member key stored for {0}")]
    NoMemberKey(String),
    #[error("member key of {login} could not be unlocked: {source}")]
    Unlock {
        login: String,
        source: MemberKeyError,
    },
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Persistence of group keys and member keys.
///
/// Group secret keys are only ever handed to the store wrapped. The store
/// decides how records are kept, but it has to make
/// [`put_group_secret_key`](GroupKeyStore::put_group_secret_key) atomic: of
/// several concurrent writers for the same group exactly one may win.
pub trait GroupKeyStore {
    fn group_exists(&self, group: &str) -> Result<bool, StoreError>;

    fn is_member(&self, group: &str, login: &str) -> Result<bool, StoreError>;

    /// The group level record showing that the group has a secret key.
    fn group_secret_key(&self, group: &str) -> Result<Option<WrappedKeyEnvelope>, StoreError>;

    /// Stores the record unless one exists already. Returns whether this
    /// call stored it.
    fn put_group_secret_key(
        &self,
        group: &str,
        envelope: WrappedKeyEnvelope,
    ) -> Result<bool, StoreError>;

    fn locked_member_key(&self, login: &str) -> Result<Option<LockedMemberKey>, StoreError>;

    fn member_key_encryption_key(
        &self,
        login: &str,
        password: &Password,
    ) -> Result<MemberKeyPair, StoreError> {
        let locked = self
            .locked_member_key(login)?
            .ok_or_else(|| StoreError::NoMemberKey(login.to_owned()))?;

        locked.unlock(password).map_err(|source| StoreError::Unlock {
            login: login.to_owned(),
            source,
        })
    }

    fn member_public_key(&self, login: &str) -> Result<Option<MemberPublicKey>, StoreError> {
        Ok(self
            .locked_member_key(login)?
            .map(|locked| locked.public_key().clone()))
    }

    fn member_wrapped_group_key(
        &self,
        group: &str,
        login: &str,
    ) -> Result<Option<WrappedKeyEnvelope>, StoreError>;

    fn put_member_wrapped_group_key(
        &self,
        group: &str,
        login: &str,
        envelope: WrappedKeyEnvelope,
    ) -> Result<(), StoreError>;

    /// Returns whether a copy was removed.
    fn remove_member_wrapped_group_key(&self, group: &str, login: &str)
    -> Result<bool, StoreError>;
}
