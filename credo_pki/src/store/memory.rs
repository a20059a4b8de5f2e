use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{GroupKeyStore, StoreError};
use crate::{envelope::WrappedKeyEnvelope, member_key::LockedMemberKey};

#[derive(Debug, Default)]
struct Group {
    members: HashSet<String>,
    secret_key: Option<WrappedKeyEnvelope>,
    wrapped_keys: HashMap<String, WrappedKeyEnvelope>,
}

#[derive(Debug, Default)]
struct Records {
    groups: HashMap<String, Group>,
    member_keys: HashMap<String, LockedMemberKey>,
}

/// [`GroupKeyStore`] keeping everything in process memory.
///
/// Meant for tests and for embedders that persist the records themselves.
#[derive(Debug, Default)]
pub struct MemoryGroupKeyStore {
    records: Mutex<Records>,
}

impl MemoryGroupKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_group(&self, group: &str) {
        self.records()
            .groups
            .entry(group.to_owned())
            .or_default();
    }

    /// Lists `login` as member of `group`, creating the group if needed.
    ///
    /// This does not give the member access to the group key yet.
    pub fn add_member(&self, group: &str, login: &str) {
        self.records()
            .groups
            .entry(group.to_owned())
            .or_default()
            .members
            .insert(login.to_owned());
    }

    /// Drops `login` from the member list and deletes their key copy.
    pub fn remove_member(&self, group: &str, login: &str) {
        if let Some(group) = self.records().groups.get_mut(group) {
            group.members.remove(login);
            group.wrapped_keys.remove(login);
        }
    }

    pub fn set_member_key(&self, login: &str, key: LockedMemberKey) {
        self.records().member_keys.insert(login.to_owned(), key);
    }
}

impl GroupKeyStore for MemoryGroupKeyStore {
    fn group_exists(&self, group: &str) -> Result<bool, StoreError> {
        Ok(self.records().groups.contains_key(group))
    }

    fn is_member(&self, group: &str, login: &str) -> Result<bool, StoreError> {
        Ok(self
            .records()
            .groups
            .get(group)
            .is_some_and(|group| group.members.contains(login)))
    }

    fn group_secret_key(&self, group: &str) -> Result<Option<WrappedKeyEnvelope>, StoreError> {
        Ok(self
            .records()
            .groups
            .get(group)
            .and_then(|group| group.secret_key.clone()))
    }

    fn put_group_secret_key(
        &self,
        group: &str,
        envelope: WrappedKeyEnvelope,
    ) -> Result<bool, StoreError> {
        let mut records = self.records();
        let group = records
            .groups
            .get_mut(group)
            .ok_or_else(|| anyhow::anyhow!("group {group} does not exist"))?;

        if group.secret_key.is_some() {
            return Ok(false);
        }

        group.secret_key = Some(envelope);
        Ok(true)
    }

    fn locked_member_key(&self, login: &str) -> Result<Option<LockedMemberKey>, StoreError> {
        Ok(self.records().member_keys.get(login).cloned())
    }

    fn member_wrapped_group_key(
        &self,
        group: &str,
        login: &str,
    ) -> Result<Option<WrappedKeyEnvelope>, StoreError> {
        Ok(self
            .records()
            .groups
            .get(group)
            .and_then(|group| group.wrapped_keys.get(login).cloned()))
    }

    fn put_member_wrapped_group_key(
        &self,
        group: &str,
        login: &str,
        envelope: WrappedKeyEnvelope,
    ) -> Result<(), StoreError> {
        let mut records = self.records();
        let group = records
            .groups
            .get_mut(group)
            .ok_or_else(|| anyhow::anyhow!("group {group} does not exist"))?;

        group.wrapped_keys.insert(login.to_owned(), envelope);
        Ok(())
    }

    fn remove_member_wrapped_group_key(
        &self,
        group: &str,
        login: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .records()
            .groups
            .get_mut(group)
            .is_some_and(|group| group.wrapped_keys.remove(login).is_some()))
    }
}
