//! Group identifiers and effective group membership

use crate::identity::{AccountId, Identity};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Opaque group UUID referenced by permission rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupUuid(Cow<'static, str>);

impl GroupUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        GroupUuid(Cow::Owned(uuid.into()))
    }

    pub const fn from_static(uuid: &'static str) -> Self {
        GroupUuid(Cow::Borrowed(uuid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// System groups are computed by the server, never stored
    pub fn is_system(&self) -> bool {
        self.0.starts_with("global:")
    }
}

impl fmt::Display for GroupUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupUuid {
    fn from(uuid: &str) -> Self {
        GroupUuid::new(uuid)
    }
}

/// Every request, signed in or not.
pub const ANONYMOUS_USERS: GroupUuid = GroupUuid::from_static("global:Anonymous-Users");
/// Every signed-in account.
pub const REGISTERED_USERS: GroupUuid = GroupUuid::from_static("global:Registered-Users");
/// The owner of the change being evaluated.
pub const CHANGE_OWNER: GroupUuid = GroupUuid::from_static("global:Change-Owner");
/// Owners of the project being evaluated.
pub const PROJECT_OWNERS: GroupUuid = GroupUuid::from_static("global:Project-Owners");

/// Effective groups of the acting user
///
/// Implicit groups are added on construction, so rule evaluation only ever
/// needs [`GroupMembership::contains`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupMembership {
    groups: HashSet<GroupUuid>,
}

impl GroupMembership {
    /// Membership of `identity` given its explicitly assigned groups.
    pub fn for_identity(identity: &Identity, groups: impl IntoIterator<Item = GroupUuid>) -> Self {
        let mut set: HashSet<GroupUuid> = groups.into_iter().collect();
        match identity {
            Identity::Internal => {}
            Identity::Anonymous => {
                set.insert(ANONYMOUS_USERS);
            }
            Identity::Identified(_) => {
                set.insert(ANONYMOUS_USERS);
                set.insert(REGISTERED_USERS);
            }
        }
        // CHANGE_OWNER is only ever granted per change
        set.remove(&CHANGE_OWNER);
        Self { groups: set }
    }

    /// Membership of an anonymous request
    pub fn anonymous() -> Self {
        Self::for_identity(&Identity::Anonymous, [])
    }

    /// Copy of this membership that also contains [`CHANGE_OWNER`].
    pub fn with_change_owner(&self) -> Self {
        let mut groups = self.groups.clone();
        groups.insert(CHANGE_OWNER);
        Self { groups }
    }

    /// Copy of this membership extended with `group`
    pub fn with_group(&self, group: GroupUuid) -> Self {
        let mut groups = self.groups.clone();
        groups.insert(group);
        Self { groups }
    }

    pub fn contains(&self, group: &GroupUuid) -> bool {
        self.groups.contains(group)
    }

    pub fn contains_any<'a>(&self, groups: impl IntoIterator<Item = &'a GroupUuid>) -> bool {
        groups.into_iter().any(|g| self.contains(g))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupUuid> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Source of group memberships
pub trait GroupBackend: Send + Sync {
    fn effective_groups(&self, identity: &Identity) -> GroupMembership;
}

/// Group backend with a fixed account-to-groups table
#[derive(Debug, Clone, Default)]
pub struct StaticGroupBackend {
    accounts: HashMap<AccountId, Vec<GroupUuid>>,
}

impl StaticGroupBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(
        mut self,
        account: AccountId,
        groups: impl IntoIterator<Item = GroupUuid>,
    ) -> Self {
        self.add_account(account, groups);
        self
    }

    pub fn add_account(&mut self, account: AccountId, groups: impl IntoIterator<Item = GroupUuid>) {
        self.accounts
            .entry(account)
            .or_default()
            .extend(groups);
    }
}

impl GroupBackend for StaticGroupBackend {
    fn effective_groups(&self, identity: &Identity) -> GroupMembership {
        let groups = identity
            .account_id()
            .and_then(|id| self.accounts.get(&id))
            .cloned()
            .unwrap_or_default();
        GroupMembership::for_identity(identity, groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_groups() {
        let anon = GroupMembership::anonymous();
        assert!(anon.contains(&ANONYMOUS_USERS));
        assert!(!anon.contains(&REGISTERED_USERS));

        let user = GroupMembership::for_identity(&Identity::account(1), [GroupUuid::new("devs")]);
        assert!(user.contains(&ANONYMOUS_USERS));
        assert!(user.contains(&REGISTERED_USERS));
        assert!(user.contains(&GroupUuid::new("devs")));
        assert!(!user.contains(&CHANGE_OWNER));
    }

    #[test]
    fn test_change_owner_only_added_explicitly() {
        let user = GroupMembership::for_identity(&Identity::account(1), [CHANGE_OWNER]);
        assert!(!user.contains(&CHANGE_OWNER));
        assert!(user.with_change_owner().contains(&CHANGE_OWNER));
    }

    #[test]
    fn test_static_backend() {
        let backend =
            StaticGroupBackend::new().with_account(AccountId(5), [GroupUuid::new("admins")]);
        let groups = backend.effective_groups(&Identity::account(5));
        assert!(groups.contains(&GroupUuid::new("admins")));
        assert_eq!(groups.len(), 3);

        let other = backend.effective_groups(&Identity::account(6));
        assert!(!other.contains(&GroupUuid::new("admins")));
    }

    #[test]
    fn test_group_uuid_equality_across_ownership() {
        assert_eq!(GroupUuid::new("global:Anonymous-Users"), ANONYMOUS_USERS);
        assert!(ANONYMOUS_USERS.is_system());
        assert!(!GroupUuid::from("devs").is_system());
    }
}
