//! Access control module
//!
//! Hierarchical, ref-pattern based access control for projects.
//!
//! ## Access Control Model
//!
//! Every project inherits from a parent, up to a root project. A project holds
//! access sections, each scoped to a ref pattern:
//!
//! - `refs/heads/master`: a single ref
//! - `refs/heads/*`: every ref under a prefix
//! - `^refs/heads/rel-[0-9]+`: a regular expression
//! - `refs/heads/users/${username}/*`: expanded per user
//!
//! A section maps permission names to rules. Each rule names a group and is
//! one of:
//!
//! - **allow**: grants the permission (with a vote range for labels)
//! - **deny**: hides allow rules for the same group and pattern further up
//! - **block**: vetoes the permission, even for grants in child projects
//!
//! A permission marked `exclusive` hides less specific grants, and lifts
//! less specific blocks defined in the same project.
//!
//! ## Example Configuration
//!
//! ```toml
//! [[projects]]
//! name = "All-Projects"
//!
//! [[projects.sections]]
//! ref = "refs/*"
//! permissions = [{ name = "read", rules = ["allow group global:Anonymous-Users"] }]
//!
//! [[projects]]
//! name = "app"
//! parent = "All-Projects"
//!
//! [[projects.sections]]
//! ref = "refs/heads/*"
//! permissions = [
//!     { name = "push", rules = ["allow group devs"] },
//!     { name = "label-Code-Review", rules = ["allow -2..+2 group devs"] },
//! ]
//! ```

pub mod groups;
pub mod patterns;
pub mod project;
pub mod resolver;
pub mod sort;
pub mod types;

pub use groups::{
    ANONYMOUS_USERS, CHANGE_OWNER, GroupBackend, GroupMembership, GroupUuid, PROJECT_OWNERS,
    REGISTERED_USERS, StaticGroupBackend,
};
pub use patterns::RefPattern;
pub use project::{Project, ProjectChain, ProjectProvider, ProjectState, ProjectStore};
pub use resolver::{AccessDecision, AccessResolver, RelevantRules};
pub use sort::SectionSortCache;
pub use types::{AccessSection, Permission, PermissionRange, PermissionRule, RuleAction};
