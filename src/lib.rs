//! refgate
//!
//! Hierarchical, ref-level access control for git hosting servers.
//!
//! ## Features
//!
//! - **Inherited project configuration**: every project inherits access
//!   sections from its parents, up to a root project
//! - **Ref patterns** with exact, prefix, regex and per-user (`${username}`) forms,
//!   ordered by specificity
//! - **Allow, deny and block rules** with `exclusive` overrides and label vote ranges
//! - **Scoped checks**: user, project, ref and change scopes with `check`, `test`,
//!   `test_or_false`, `check_any` and bulk filtering
//! - **Ref visibility** for branches, tags, change refs, edit refs and account refs
//!
//! ## Scope chain
//!
//! ```text
//! PermissionBackend → user → project → ref → change
//! ```
//!
//! Every scope answers permission questions for its own level and narrows to
//! the next one. A scope that could not be resolved still answers, by failing.
//!
//! ## Example Configuration
//!
//! ```toml
//! [engine]
//! all_projects = "All-Projects"
//!
//! [[projects]]
//! name = "All-Projects"
//! capabilities = [{ name = "administrateServer", rules = ["allow group admins"] }]
//!
//! [[projects.sections]]
//! ref = "refs/*"
//! permissions = [{ name = "read", rules = ["allow group global:Anonymous-Users"] }]
//!
//! [[projects]]
//! name = "app"
//!
//! [[projects.sections]]
//! ref = "refs/heads/*"
//! permissions = [
//!     { name = "push", rules = ["allow group devs"] },
//!     { name = "label-Code-Review", rules = ["allow -2..+2 group devs"] },
//! ]
//! ```

pub mod access_control;
pub mod backend;
pub mod change;
pub mod config;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod util;

// Re-export main types
pub use backend::{
    AuthDeniedPermissionBackend, BackendSettings, PermissionBackend, PermissionBackendCondition,
    PermissionScope, RefFilterOptions,
};
pub use config::{AppConfig, load_config};
pub use error::{AppError, AuthError, PermissionBackendError, PermissionError, Result};
pub use identity::{AccountId, Identity};
