//! Ref name constants and parsers for server-managed refs.

pub const REFS: &str = "refs/";
pub const REFS_HEADS: &str = "refs/heads/";
pub const REFS_TAGS: &str = "refs/tags/";
pub const REFS_FOR: &str = "refs/for/";
pub const REFS_CHANGES: &str = "refs/changes/";
pub const REFS_USERS: &str = "refs/users/";
pub const REFS_CONFIG: &str = "refs/meta/config";
pub const REFS_CACHE_AUTOMERGE: &str = "refs/cache-automerge/";
pub const REFS_SEQUENCES: &str = "refs/sequences/";
pub const REFS_GROUPS: &str = "refs/groups/";
pub const REFS_DRAFT_COMMENTS: &str = "refs/draft-comments/";
pub const REFS_STARRED_CHANGES: &str = "refs/starred-changes/";
pub const REFS_EXTERNAL_IDS: &str = "refs/meta/external-ids";

/// Edit refs live below the owning account: `refs/users/NN/ACCOUNT/edit-CHANGE/PS`.
const EDIT_PREFIX: &str = "edit-";

/// Refs whose content is server metadata rather than ordinary branches.
pub fn is_server_managed(name: &str) -> bool {
    [
        REFS_CHANGES,
        REFS_USERS,
        REFS_CACHE_AUTOMERGE,
        REFS_SEQUENCES,
        REFS_GROUPS,
        REFS_DRAFT_COMMENTS,
        REFS_STARRED_CHANGES,
    ]
    .iter()
    .any(|prefix| name.starts_with(prefix))
        || name == REFS_EXTERNAL_IDS
}

pub fn is_tag(name: &str) -> bool {
    name.starts_with(REFS_TAGS)
}

pub fn is_config(name: &str) -> bool {
    name == REFS_CONFIG
}

/// Magic ref a change for `branch` is uploaded to.
pub fn for_ref(branch: &str) -> String {
    format!("{}{}", REFS_FOR, branch)
}

/// Two-digit shard directory used for change and account refs.
pub fn shard(id: u32) -> String {
    format!("{:02}", id % 100)
}

pub fn change_ref_prefix(change: u32) -> String {
    format!("{}{}/{}/", REFS_CHANGES, shard(change), change)
}

pub fn account_ref(account: u32) -> String {
    format!("{}{}/{}", REFS_USERS, shard(account), account)
}

pub fn edit_ref(account: u32, change: u32, patch_set: u32) -> String {
    format!("{}/{}{}/{}", account_ref(account), EDIT_PREFIX, change, patch_set)
}

/// Parses `NN/ID` and checks the shard matches the id.
fn sharded_id<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Option<u32> {
    let shard_part = parts.next()?;
    let id: u32 = parts.next()?.parse().ok()?;
    (shard_part == shard(id)).then_some(id)
}

/// Change number of a change ref (`refs/changes/NN/ID/...`).
pub fn parse_change_ref(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(REFS_CHANGES)?;
    let mut parts = rest.split('/');
    let id = sharded_id(&mut parts)?;
    match parts.next() {
        Some(tail) if !tail.is_empty() => Some(id),
        _ => None,
    }
}

/// Account and change of an edit ref (`refs/users/NN/ACCOUNT/edit-CHANGE/PS`).
pub fn parse_edit_ref(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix(REFS_USERS)?;
    let mut parts = rest.split('/');
    let account = sharded_id(&mut parts)?;
    let change = parts.next()?.strip_prefix(EDIT_PREFIX)?.parse().ok()?;
    let patch_set = parts.next()?;
    if patch_set.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((account, change))
}

/// Account of an account ref (`refs/users/NN/ACCOUNT`).
pub fn parse_account_ref(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(REFS_USERS)?;
    let mut parts = rest.split('/');
    let account = sharded_id(&mut parts)?;
    parts.next().is_none().then_some(account)
}
