//! Permission vocabulary
//!
//! Permissions are grouped by the scope they are checked at:
//!
//! - [`GlobalPermission`]: server-wide capabilities
//! - [`ProjectPermission`]: operations on a whole project
//! - [`RefPermission`]: operations on a single ref
//! - [`ChangePermission`] and label permissions: operations on a change
//!
//! The [`names`] module holds the permission names used in access sections,
//! which the scoped permissions above are evaluated through.

pub mod label;
pub mod names;
pub mod types;

pub use label::{LabelPermission, LabelPermissionWithValue, LabelType};
pub use types::{
    ChangePermission, ChangeScopePermission, GlobalPermission, ProjectPermission, RefPermission,
};
