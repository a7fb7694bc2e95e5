//! Change snapshots

use crate::identity::AccountId;
use crate::util::refs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric change identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u32);

impl ChangeId {
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Change a `refs/changes/...` ref belongs to
    pub fn from_ref(name: &str) -> Option<Self> {
        refs::parse_change_ref(name).map(ChangeId)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ChangeId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    #[default]
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub const fn is_open(&self) -> bool {
        matches!(self, ChangeStatus::New)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::New => "new",
            ChangeStatus::Merged => "merged",
            ChangeStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a change permission checks look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    id: ChangeId,
    project: String,
    dest: String,
    owner: AccountId,
    status: ChangeStatus,
    private: bool,
    reviewers: Vec<AccountId>,
}

impl Change {
    /// A new open change; `dest` may be given with or without `refs/heads/`.
    pub fn new(
        id: ChangeId,
        project: impl Into<String>,
        dest: impl Into<String>,
        owner: AccountId,
    ) -> Self {
        let dest = dest.into();
        let dest = if dest.starts_with(refs::REFS) {
            dest
        } else {
            format!("{}{}", refs::REFS_HEADS, dest)
        };
        Self {
            id,
            project: project.into(),
            dest,
            owner,
            status: ChangeStatus::New,
            private: false,
            reviewers: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ChangeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_reviewer(mut self, reviewer: AccountId) -> Self {
        self.reviewers.push(reviewer);
        self
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Full name of the destination branch
    pub fn dest(&self) -> &str {
        &self.dest
    }

    pub fn owner(&self) -> AccountId {
        self.owner
    }

    pub fn status(&self) -> ChangeStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn reviewers(&self) -> &[AccountId] {
        &self.reviewers
    }

    pub fn is_reviewer(&self, account: AccountId) -> bool {
        self.reviewers.contains(&account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_is_normalized() {
        let change = Change::new(ChangeId(1), "p", "master", AccountId(1));
        assert_eq!(change.dest(), "refs/heads/master");

        let change = Change::new(ChangeId(1), "p", "refs/meta/config", AccountId(1));
        assert_eq!(change.dest(), "refs/meta/config");
    }

    #[test]
    fn test_change_id_from_ref() {
        assert_eq!(ChangeId::from_ref("refs/changes/34/1234/1"), Some(ChangeId(1234)));
        assert_eq!(ChangeId::from_ref("refs/heads/master"), None);
    }

    #[test]
    fn test_status() {
        assert!(ChangeStatus::New.is_open());
        assert!(!ChangeStatus::Merged.is_open());
        assert_eq!(ChangeStatus::Abandoned.to_string(), "abandoned");
    }
}
