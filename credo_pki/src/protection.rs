use std::fmt::Debug;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    Password,
    config::ProtectionConfig,
    envelope::WrappedKeyEnvelope,
    group_key::GroupSecretKey,
    member_key::{LockedMemberKey, MemberKeyError, MemberKeyPair},
    private_key::PrivateKeyMaterial,
    store::{GroupKeyStore, StoreError},
};

/// Who acts on which group. Never persisted.
#[derive(Clone)]
pub struct ProtectionContext {
    group: String,
    login: String,
    password: Password,
}

impl Debug for ProtectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionContext")
            .field("group", &self.group)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl ProtectionContext {
    pub fn new(
        group: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<Password>,
    ) -> Self {
        Self {
            group: group.into(),
            login: login.into(),
            password: password.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn password(&self) -> &Password {
        &self.password
    }
}

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("group {0} does not exist")]
    NoSuchGroup(String),
    #[error("access to group {0} denied")]
    GroupAccessDenied(String),
    #[error("access denied for user {0}")]
    UserAccessDenied(String),
    #[error("{0} is not a member with a key")]
    UnknownMember(String),
    #[error("key store error: {0}")]
    Store(#[from] StoreError),
}

fn group_denied(ctx: &ProtectionContext, err: impl std::fmt::Display) -> ProtectionError {
    debug!("group key operation for {} failed: {err}", ctx.group);
    ProtectionError::GroupAccessDenied(ctx.group.clone())
}

/// Wraps credential private keys under group secret keys, which in turn
/// are wrapped for every member of the group.
#[derive(Debug)]
pub struct EnvelopeProtectionService<S> {
    store: S,
    config: ProtectionConfig,
}

impl<S> EnvelopeProtectionService<S>
where
    S: GroupKeyStore,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, ProtectionConfig::default())
    }

    pub fn with_config(store: S, config: ProtectionConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Creates a member key locked with the configured cost.
    pub fn create_member_key(
        &self,
        password: &Password,
    ) -> Result<LockedMemberKey, MemberKeyError> {
        MemberKeyPair::generate().lock(password, self.config.member_key_cost.clone())
    }

    pub fn change_member_password(
        &self,
        locked: &LockedMemberKey,
        old: &Password,
        new: &Password,
    ) -> Result<LockedMemberKey, MemberKeyError> {
        locked.change_password(old, new, self.config.member_key_cost.clone())
    }

    /// Wraps `key` for the group of `ctx`, creating the group key on first
    /// use.
    pub fn protect(
        &self,
        key: &PrivateKeyMaterial,
        ctx: &ProtectionContext,
    ) -> Result<WrappedKeyEnvelope, ProtectionError> {
        let group_key = self.open_group(ctx)?;

        let envelope = group_key
            .wrap_private_key(key)
            .map_err(|err| group_denied(ctx, err))?;

        debug!("protected private key for group {}", ctx.group);
        Ok(envelope)
    }

    pub fn unprotect(
        &self,
        envelope: &WrappedKeyEnvelope,
        ctx: &ProtectionContext,
    ) -> Result<PrivateKeyMaterial, ProtectionError> {
        let member_key = self.unlock_member_key(ctx)?;

        let copy = self
            .store
            .member_wrapped_group_key(&ctx.group, &ctx.login)?
            .ok_or_else(|| ProtectionError::GroupAccessDenied(ctx.group.clone()))?;

        let group_key = member_key
            .unwrap_group_key(&copy, &ctx.group, &ctx.login)
            .map_err(|err| group_denied(ctx, err))?;

        group_key
            .unwrap_private_key(envelope)
            .map_err(|err| group_denied(ctx, err))
    }

    /// Moves a protected key from the group of `from` to the group of `to`.
    pub fn transfer(
        &self,
        envelope: &WrappedKeyEnvelope,
        from: &ProtectionContext,
        to: &ProtectionContext,
    ) -> Result<WrappedKeyEnvelope, ProtectionError> {
        let key = self.unprotect(envelope, from)?;
        let envelope = self.protect(&key, to)?;
        info!(
            "transferred private key from group {} to group {}",
            from.group, to.group
        );
        Ok(envelope)
    }

    /// The acting member of `ctx` shares the group key with `login`.
    pub fn grant_access(
        &self,
        ctx: &ProtectionContext,
        login: &str,
    ) -> Result<(), ProtectionError> {
        let group_key = self.open_group(ctx)?;

        if !self.store.is_member(&ctx.group, login)? {
            return Err(ProtectionError::UnknownMember(login.to_owned()));
        }

        let public_key = self
            .store
            .member_public_key(login)?
            .ok_or_else(|| ProtectionError::UnknownMember(login.to_owned()))?;

        let copy = public_key
            .wrap_group_key(&group_key, &ctx.group, login)
            .map_err(|err| group_denied(ctx, err))?;
        self.store
            .put_member_wrapped_group_key(&ctx.group, login, copy)?;

        info!("{} granted {login} access to group {}", ctx.login, ctx.group);
        Ok(())
    }

    /// Deletes the group key copy of `login`. Nothing is re-encrypted.
    ///
    /// Returns whether the member had a copy.
    pub fn revoke_access(&self, group: &str, login: &str) -> Result<bool, ProtectionError> {
        let removed = self.store.remove_member_wrapped_group_key(group, login)?;
        if removed {
            info!("revoked access of {login} to group {group}");
        }
        Ok(removed)
    }

    fn unlock_member_key(
        &self,
        ctx: &ProtectionContext,
    ) -> Result<MemberKeyPair, ProtectionError> {
        match self
            .store
            .member_key_encryption_key(&ctx.login, &ctx.password)
        {
            Ok(key) => Ok(key),
            Err(StoreError::Backend(err)) => Err(StoreError::Backend(err).into()),
            Err(err) => {
                debug!("could not unlock member key: {err}");
                Err(ProtectionError::UserAccessDenied(ctx.login.clone()))
            }
        }
    }

    /// Checks group and membership, then resolves the group key through the
    /// acting member's key.
    fn open_group(&self, ctx: &ProtectionContext) -> Result<GroupSecretKey, ProtectionError> {
        if !self.store.group_exists(&ctx.group)? {
            return Err(ProtectionError::NoSuchGroup(ctx.group.clone()));
        }

        if !self.store.is_member(&ctx.group, &ctx.login)? {
            return Err(ProtectionError::GroupAccessDenied(ctx.group.clone()));
        }

        let member_key = self.unlock_member_key(ctx)?;
        self.group_key(ctx, &member_key)
    }

    fn group_key(
        &self,
        ctx: &ProtectionContext,
        member_key: &MemberKeyPair,
    ) -> Result<GroupSecretKey, ProtectionError> {
        if let Some(check) = self.store.group_secret_key(&ctx.group)? {
            return self.existing_group_key(ctx, member_key, &check);
        }

        let group_key = GroupSecretKey::generate().map_err(|err| group_denied(ctx, err))?;
        let check = group_key
            .check_value()
            .map_err(|err| group_denied(ctx, err))?;

        if self.store.put_group_secret_key(&ctx.group, check)? {
            let copy = member_key
                .public_key()
                .wrap_group_key(&group_key, &ctx.group, &ctx.login)
                .map_err(|err| group_denied(ctx, err))?;
            self.store
                .put_member_wrapped_group_key(&ctx.group, &ctx.login, copy)?;

            info!("created secret key for group {}", ctx.group);
            return Ok(group_key);
        }

        warn!(
            "another writer created the secret key for group {} first",
            ctx.group
        );

        let check = self
            .store
            .group_secret_key(&ctx.group)?
            .ok_or_else(|| ProtectionError::GroupAccessDenied(ctx.group.clone()))?;
        self.existing_group_key(ctx, member_key, &check)
    }

    fn existing_group_key(
        &self,
        ctx: &ProtectionContext,
        member_key: &MemberKeyPair,
        check: &WrappedKeyEnvelope,
    ) -> Result<GroupSecretKey, ProtectionError> {
        let copy = self
            .store
            .member_wrapped_group_key(&ctx.group, &ctx.login)?
            .ok_or_else(|| ProtectionError::GroupAccessDenied(ctx.group.clone()))?;

        let group_key = member_key
            .unwrap_group_key(&copy, &ctx.group, &ctx.login)
            .map_err(|err| group_denied(ctx, err))?;

        group_key
            .verify(check)
            .map_err(|err| group_denied(ctx, err))?;

        Ok(group_key)
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use super::{EnvelopeProtectionService, ProtectionContext, ProtectionError};
    use crate::{
        Password,
        argon::ArgonCost,
        config::ProtectionConfig,
        envelope::{EnvelopeKind, WrappedKeyEnvelope},
        group_key::GroupSecretKey,
        member_key::{LockedMemberKey, MemberKeyPair, MemberPublicKey},
        store::{GroupKeyStore, StoreError, memory::MemoryGroupKeyStore},
        test::fixtures,
    };

    fn service() -> EnvelopeProtectionService<MemoryGroupKeyStore> {
        let config = ProtectionConfig {
            member_key_cost: ArgonCost::new(1024, 1, 1),
            ..Default::default()
        };
        let service = EnvelopeProtectionService::with_config(MemoryGroupKeyStore::new(), config);
        add_user(&service, "finance", "alice", "alice-pw");
        service
    }

    fn add_user(
        service: &EnvelopeProtectionService<MemoryGroupKeyStore>,
        group: &str,
        login: &str,
        password: &str,
    ) {
        let locked = service
            .create_member_key(&Password::from(password))
            .unwrap();
        service.store().set_member_key(login, locked);
        service.store().add_member(group, login);
    }

    #[test]
    fn protect_unprotect_roundtrip() {
        let service = service();
        let ctx = ProtectionContext::new("finance", "alice", "alice-pw");
        let key = fixtures::leaf_key();

        let envelope = service.protect(&key, &ctx).unwrap();
        assert_eq!(envelope.kind(), EnvelopeKind::PrivateKey);

        let recovered = service.unprotect(&envelope, &ctx).unwrap();
        assert_eq!(recovered, key);
        assert_eq!(
            recovered.to_pkcs8_der().unwrap(),
            key.to_pkcs8_der().unwrap()
        );
    }

    #[test]
    fn group_key_is_created_once() {
        let service = service();
        let ctx = ProtectionContext::new("finance", "alice", "alice-pw");

        assert!(service.store().group_secret_key("finance").unwrap().is_none());
        let first = service.protect(&fixtures::leaf_key(), &ctx).unwrap();
        let check = service.store().group_secret_key("finance").unwrap().unwrap();

        let second = service.protect(&fixtures::intermediate_key(), &ctx).unwrap();
        assert_eq!(
            service.store().group_secret_key("finance").unwrap().unwrap(),
            check
        );

        assert_eq!(service.unprotect(&first, &ctx).unwrap(), fixtures::leaf_key());
        assert_eq!(
            service.unprotect(&second, &ctx).unwrap(),
            fixtures::intermediate_key()
        );
    }

    #[test]
    fn unknown_group() {
        let service = service();
        let ctx = ProtectionContext::new("legal", "alice", "alice-pw");

        assert!(matches!(
            service.protect(&fixtures::leaf_key(), &ctx),
            Err(ProtectionError::NoSuchGroup(group)) if group == "legal"
        ));
    }

    #[test]
    fn non_member_is_denied() {
        let service = service();
        add_user(&service, "hr", "bob", "bob-pw");

        let ctx = ProtectionContext::new("finance", "bob", "bob-pw");
        assert!(matches!(
            service.protect(&fixtures::leaf_key(), &ctx),
            Err(ProtectionError::GroupAccessDenied(group)) if group == "finance"
        ));

        let envelope = service
            .protect(
                &fixtures::leaf_key(),
                &ProtectionContext::new("finance", "alice", "alice-pw"),
            )
            .unwrap();
        assert!(matches!(
            service.unprotect(&envelope, &ctx),
            Err(ProtectionError::GroupAccessDenied(group)) if group == "finance"
        ));
    }

    #[test]
    fn wrong_password_is_denied() {
        let service = service();
        let good = ProtectionContext::new("finance", "alice", "alice-pw");
        let bad = ProtectionContext::new("finance", "alice", "nope");

        assert!(matches!(
            service.protect(&fixtures::leaf_key(), &bad),
            Err(ProtectionError::UserAccessDenied(login)) if login == "alice"
        ));

        let envelope = service.protect(&fixtures::leaf_key(), &good).unwrap();
        assert!(matches!(
            service.unprotect(&envelope, &bad),
            Err(ProtectionError::UserAccessDenied(login)) if login == "alice"
        ));
    }

    #[test]
    fn member_without_copy_is_denied_until_granted() {
        let service = service();
        let alice = ProtectionContext::new("finance", "alice", "alice-pw");
        let envelope = service.protect(&fixtures::leaf_key(), &alice).unwrap();

        add_user(&service, "finance", "carol", "carol-pw");
        let carol = ProtectionContext::new("finance", "carol", "carol-pw");

        assert!(matches!(
            service.unprotect(&envelope, &carol),
            Err(ProtectionError::GroupAccessDenied(_))
        ));
        assert!(matches!(
            service.protect(&fixtures::leaf_key(), &carol),
            Err(ProtectionError::GroupAccessDenied(_))
        ));

        service.grant_access(&alice, "carol").unwrap();
        assert_eq!(
            service.unprotect(&envelope, &carol).unwrap(),
            fixtures::leaf_key()
        );
    }

    #[test]
    fn grant_requires_listed_member_with_key() {
        let service = service();
        let alice = ProtectionContext::new("finance", "alice", "alice-pw");

        add_user(&service, "hr", "bob", "bob-pw");
        assert!(matches!(
            service.grant_access(&alice, "bob"),
            Err(ProtectionError::UnknownMember(login)) if login == "bob"
        ));

        service.store().add_member("finance", "dave");
        assert!(matches!(
            service.grant_access(&alice, "dave"),
            Err(ProtectionError::UnknownMember(login)) if login == "dave"
        ));
    }

    #[test]
    fn revoked_member_loses_access() {
        let service = service();
        add_user(&service, "finance", "carol", "carol-pw");
        let alice = ProtectionContext::new("finance", "alice", "alice-pw");
        let carol = ProtectionContext::new("finance", "carol", "carol-pw");

        let envelope = service.protect(&fixtures::leaf_key(), &alice).unwrap();
        service.grant_access(&alice, "carol").unwrap();
        assert!(service.unprotect(&envelope, &carol).is_ok());

        assert!(service.revoke_access("finance", "carol").unwrap());
        assert!(!service.revoke_access("finance", "carol").unwrap());
        assert!(matches!(
            service.unprotect(&envelope, &carol),
            Err(ProtectionError::GroupAccessDenied(_))
        ));

        // the remaining member is unaffected
        assert!(service.unprotect(&envelope, &alice).is_ok());
    }

    #[test]
    fn transfer_between_groups() {
        let service = service();
        add_user(&service, "hr", "alice", "alice-pw");
        add_user(&service, "hr", "bob", "bob-pw");

        let finance = ProtectionContext::new("finance", "alice", "alice-pw");
        let hr = ProtectionContext::new("hr", "alice", "alice-pw");

        let envelope = service.protect(&fixtures::leaf_key(), &finance).unwrap();
        let moved = service.transfer(&envelope, &finance, &hr).unwrap();

        assert_eq!(service.unprotect(&moved, &hr).unwrap(), fixtures::leaf_key());
        assert!(service.unprotect(&moved, &finance).is_err());

        // bob has no copy of the hr key yet
        let bob = ProtectionContext::new("hr", "bob", "bob-pw");
        assert!(service.unprotect(&moved, &bob).is_err());
        service.grant_access(&hr, "bob").unwrap();
        assert_eq!(service.unprotect(&moved, &bob).unwrap(), fixtures::leaf_key());
    }

    #[test]
    fn tampered_copy_is_denied() {
        let service = service();
        let alice = ProtectionContext::new("finance", "alice", "alice-pw");
        let envelope = service.protect(&fixtures::leaf_key(), &alice).unwrap();

        // a copy of some other key, wrapped correctly for alice
        let public = service.store().member_public_key("alice").unwrap().unwrap();
        let foreign = public
            .wrap_group_key(&GroupSecretKey::generate().unwrap(), "finance", "alice")
            .unwrap();
        service
            .store()
            .put_member_wrapped_group_key("finance", "alice", foreign)
            .unwrap();

        assert!(matches!(
            service.protect(&fixtures::leaf_key(), &alice),
            Err(ProtectionError::GroupAccessDenied(_))
        ));
        assert!(matches!(
            service.unprotect(&envelope, &alice),
            Err(ProtectionError::GroupAccessDenied(_))
        ));
    }

    /// Store that lets another writer publish a group key between our read
    /// and our write.
    struct RacingStore {
        inner: MemoryGroupKeyStore,
        rival_key: GroupSecretKey,
        rival_done: Cell<bool>,
    }

    impl GroupKeyStore for RacingStore {
        fn group_exists(&self, group: &str) -> Result<bool, StoreError> {
            self.inner.group_exists(group)
        }

        fn is_member(&self, group: &str, login: &str) -> Result<bool, StoreError> {
            self.inner.is_member(group, login)
        }

        fn group_secret_key(
            &self,
            group: &str,
        ) -> Result<Option<WrappedKeyEnvelope>, StoreError> {
            self.inner.group_secret_key(group)
        }

        fn put_group_secret_key(
            &self,
            group: &str,
            envelope: WrappedKeyEnvelope,
        ) -> Result<bool, StoreError> {
            if !self.rival_done.replace(true) {
                let check = self.rival_key.check_value().unwrap();
                assert!(self.inner.put_group_secret_key(group, check)?);

                let public = self.inner.member_public_key("alice")?.unwrap();
                let copy = public
                    .wrap_group_key(&self.rival_key, group, "alice")
                    .unwrap();
                self.inner
                    .put_member_wrapped_group_key(group, "alice", copy)?;
            }
            self.inner.put_group_secret_key(group, envelope)
        }

        fn locked_member_key(
            &self,
            login: &str,
        ) -> Result<Option<LockedMemberKey>, StoreError> {
            self.inner.locked_member_key(login)
        }

        fn member_public_key(
            &self,
            login: &str,
        ) -> Result<Option<MemberPublicKey>, StoreError> {
            self.inner.member_public_key(login)
        }

        fn member_wrapped_group_key(
            &self,
            group: &str,
            login: &str,
        ) -> Result<Option<WrappedKeyEnvelope>, StoreError> {
            self.inner.member_wrapped_group_key(group, login)
        }

        fn put_member_wrapped_group_key(
            &self,
            group: &str,
            login: &str,
            envelope: WrappedKeyEnvelope,
        ) -> Result<(), StoreError> {
            self.inner
                .put_member_wrapped_group_key(group, login, envelope)
        }

        fn remove_member_wrapped_group_key(
            &self,
            group: &str,
            login: &str,
        ) -> Result<bool, StoreError> {
            self.inner.remove_member_wrapped_group_key(group, login)
        }
    }

    #[test]
    fn losing_writer_uses_existing_key() {
        let inner = MemoryGroupKeyStore::new();
        let locked = MemberKeyPair::generate()
            .lock(&Password::from("alice-pw"), ArgonCost::new(1024, 1, 1))
            .unwrap();
        inner.set_member_key("alice", locked);
        inner.add_member("finance", "alice");

        let rival_key = GroupSecretKey::generate().unwrap();
        let service = EnvelopeProtectionService::new(RacingStore {
            inner,
            rival_key: rival_key.clone(),
            rival_done: Cell::new(false),
        });

        let ctx = ProtectionContext::new("finance", "alice", "alice-pw");
        let envelope = service.protect(&fixtures::leaf_key(), &ctx).unwrap();

        // the envelope is sealed under the key that won the race
        assert_eq!(
            rival_key.unwrap_private_key(&envelope).unwrap(),
            fixtures::leaf_key()
        );
        assert_eq!(service.unprotect(&envelope, &ctx).unwrap(), fixtures::leaf_key());
    }

    #[test]
    fn context_debug_hides_password() {
        let ctx = ProtectionContext::new("finance", "alice", "alice-pw");
        let printed = format!("{ctx:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("alice-pw"));
    }
}
