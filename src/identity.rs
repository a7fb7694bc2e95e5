//! Acting user identities
//!
//! The engine never authenticates anyone; it receives an already-established
//! [`Identity`] and asks the group backend what that identity belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl AccountId {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(AccountId)
    }
}

/// How the request reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPath {
    #[default]
    Unknown,
    /// git protocol (push/fetch)
    Git,
    RestApi,
    SshCommand,
    WebBrowser,
}

/// A signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentifiedUser {
    pub account_id: AccountId,
    pub username: Option<String>,
    pub access_path: AccessPath,
}

impl IdentifiedUser {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            username: None,
            access_path: AccessPath::Unknown,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_access_path(mut self, access_path: AccessPath) -> Self {
        self.access_path = access_path;
        self
    }
}

/// The user a permission request is evaluated for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Nobody signed in
    Anonymous,
    /// Server-internal work, such as background jobs
    Internal,
    Identified(IdentifiedUser),
}

impl Identity {
    /// Shorthand for an identified user without username
    pub fn account(id: u32) -> Self {
        Identity::Identified(IdentifiedUser::new(AccountId(id)))
    }

    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Identity::Identified(user) => Some(user.account_id),
            _ => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::Identified(user) => user.username.as_deref(),
            _ => None,
        }
    }

    pub fn access_path(&self) -> AccessPath {
        match self {
            Identity::Identified(user) => user.access_path,
            _ => AccessPath::Unknown,
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, Identity::Identified(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Identity::Internal)
    }

    /// Stable key used to deduplicate checks made for the same user
    ///
    /// Holds everything a check can depend on: the username expands
    /// `${username}` patterns and the access path decides force updates.
    pub fn cache_key(&self) -> String {
        match self {
            Identity::Anonymous => "anonymous".to_string(),
            Identity::Internal => "internal".to_string(),
            Identity::Identified(user) => format!(
                "account:{}:{:?}:{}",
                user.account_id,
                user.access_path,
                user.username.as_deref().unwrap_or_default()
            ),
        }
    }
}

impl From<IdentifiedUser> for Identity {
    fn from(user: IdentifiedUser) -> Self {
        Identity::Identified(user)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("anonymous"),
            Identity::Internal => f.write_str("internal"),
            Identity::Identified(user) => match &user.username {
                Some(name) => write!(f, "{} ({})", name, user.account_id),
                None => write!(f, "account {}", user.account_id),
            },
        }
    }
}
