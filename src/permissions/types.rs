//! Permission enumerations for each scope

use crate::permissions::label::{LabelPermission, LabelPermissionWithValue};
use std::fmt;

/// Declares a permission enum with its wire name and user-facing description.
macro_rules! permission_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => ($text:literal, $describe:literal), )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
        }

        impl $name {
            /// Get the permission name as a string
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )*
                }
            }

            /// Human readable form used in denial messages
            pub const fn describe(&self) -> &'static str {
                match self {
                    $( $name::$variant => $describe, )*
                }
            }

            /// Try to parse a permission from its name
            pub fn try_parse(s: &str) -> Option<Self> {
                match s {
                    $( $text => Some($name::$variant), )*
                    _ => None,
                }
            }

            /// Get all permissions of this scope
            pub fn all() -> &'static [$name] {
                &[ $( $name::$variant, )* ]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

permission_enum! {
    /// Server-wide capabilities, granted on the root project
    pub enum GlobalPermission {
        AdministrateServer => ("administrateServer", "administrate server"),
        AccessDatabase => ("accessDatabase", "access database"),
        CreateAccount => ("createAccount", "create account"),
        CreateGroup => ("createGroup", "create group"),
        CreateProject => ("createProject", "create project"),
        EmailReviewers => ("emailReviewers", "email reviewers"),
        FlushCaches => ("flushCaches", "flush caches"),
        KillTask => ("killTask", "kill task"),
        MaintainServer => ("maintainServer", "maintain server"),
        ModifyAccount => ("modifyAccount", "modify account"),
        RunAs => ("runAs", "run as"),
        RunGc => ("runGC", "run garbage collection"),
        StreamEvents => ("streamEvents", "stream events"),
        ViewAccess => ("viewAccess", "view access"),
        ViewAllAccounts => ("viewAllAccounts", "view all accounts"),
        ViewCaches => ("viewCaches", "view caches"),
        ViewConnections => ("viewConnections", "view connections"),
        ViewPlugins => ("viewPlugins", "view plugins"),
        ViewQueue => ("viewQueue", "view queue"),
    }
}

permission_enum! {
    /// Permissions on a project as a whole
    pub enum ProjectPermission {
        /// See that the project exists
        Access => ("access", "access project"),
        /// Read every ref of the project
        Read => ("read", "read project"),
        CreateRef => ("create_ref", "create ref"),
        CreateTagRef => ("create_tag_ref", "create tag ref"),
        CreateChange => ("create_change", "create change"),
        RunUploadPack => ("run_upload_pack", "run upload pack"),
        RunReceivePack => ("run_receive_pack", "run receive pack"),
        PushAtLeastOneRef => ("push_at_least_one_ref", "push to at least one ref"),
        ReadConfig => ("read_config", "read project configuration"),
        WriteConfig => ("write_config", "write project configuration"),
        BanCommit => ("ban_commit", "ban commit"),
        ReadReflog => ("read_reflog", "read reflog"),
    }
}

permission_enum! {
    /// Permissions on a single ref
    pub enum RefPermission {
        Read => ("read", "read"),
        Create => ("create", "create"),
        Delete => ("delete", "delete"),
        Update => ("update", "update"),
        ForceUpdate => ("force_update", "force update"),
        SetHead => ("set_head", "set HEAD"),
        ForgeAuthor => ("forge_author", "forge author"),
        ForgeCommitter => ("forge_committer", "forge committer"),
        ForgeServer => ("forge_server", "forge server"),
        Merge => ("merge", "push merge"),
        SkipValidation => ("skip_validation", "skip validation"),
        CreateChange => ("create_change", "create change"),
        CreateTag => ("create_tag", "create tag"),
        CreateSignedTag => ("create_signed_tag", "create signed tag"),
        UpdateBySubmit => ("update_by_submit", "update by submit"),
        ReadPrivateChanges => ("read_private_changes", "read private changes"),
        ReadConfig => ("read_config", "read configuration"),
        WriteConfig => ("write_config", "write configuration"),
    }
}

permission_enum! {
    /// Permissions on a change
    pub enum ChangePermission {
        Read => ("read", "read"),
        Restore => ("restore", "restore"),
        Delete => ("delete", "delete"),
        Abandon => ("abandon", "abandon"),
        EditAssignee => ("edit_assignee", "edit assignee"),
        EditDescription => ("edit_description", "edit description"),
        EditHashtags => ("edit_hashtags", "edit hashtags"),
        EditTopicName => ("edit_topic_name", "edit topic name"),
        RemoveReviewer => ("remove_reviewer", "remove reviewer"),
        AddPatchSet => ("add_patch_set", "add patch set"),
        Rebase => ("rebase", "rebase"),
        Revert => ("revert", "revert"),
        Submit => ("submit", "submit"),
        SubmitAs => ("submit_as", "submit on behalf of other users"),
        ToggleWorkInProgressState => ("toggle_wip_state", "toggle work in progress state"),
    }
}

impl ProjectPermission {
    /// Permissions that modify the repository or its configuration
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            ProjectPermission::CreateRef
                | ProjectPermission::CreateTagRef
                | ProjectPermission::CreateChange
                | ProjectPermission::RunReceivePack
                | ProjectPermission::PushAtLeastOneRef
                | ProjectPermission::WriteConfig
                | ProjectPermission::BanCommit
        )
    }
}

impl RefPermission {
    /// Permissions that change the ref or produce new content for it
    pub const fn is_write(&self) -> bool {
        !matches!(
            self,
            RefPermission::Read | RefPermission::ReadPrivateChanges | RefPermission::ReadConfig
        )
    }
}

impl ChangePermission {
    pub const fn is_write(&self) -> bool {
        !matches!(self, ChangePermission::Read)
    }
}

/// Anything that can be checked on a change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeScopePermission {
    Change(ChangePermission),
    Label(LabelPermission),
    LabelValue(LabelPermissionWithValue),
}

impl ChangeScopePermission {
    pub fn describe(&self) -> String {
        match self {
            ChangeScopePermission::Change(p) => p.describe().to_string(),
            ChangeScopePermission::Label(p) => p.describe(),
            ChangeScopePermission::LabelValue(p) => p.describe(),
        }
    }
}

impl fmt::Display for ChangeScopePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeScopePermission::Change(p) => write!(f, "{}", p),
            ChangeScopePermission::Label(p) => write!(f, "{}", p),
            ChangeScopePermission::LabelValue(p) => write!(f, "{}", p),
        }
    }
}

impl From<ChangePermission> for ChangeScopePermission {
    fn from(p: ChangePermission) -> Self {
        ChangeScopePermission::Change(p)
    }
}

impl From<LabelPermission> for ChangeScopePermission {
    fn from(p: LabelPermission) -> Self {
        ChangeScopePermission::Label(p)
    }
}

impl From<LabelPermissionWithValue> for ChangeScopePermission {
    fn from(p: LabelPermissionWithValue) -> Self {
        ChangeScopePermission::LabelValue(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_permission_names() {
        assert_eq!(GlobalPermission::RunGc.as_str(), "runGC");
        assert_eq!(
            GlobalPermission::try_parse("administrateServer"),
            Some(GlobalPermission::AdministrateServer)
        );
        assert_eq!(GlobalPermission::try_parse("bogus"), None);
    }

    #[test]
    fn test_all_round_trips_through_parse() {
        for p in RefPermission::all() {
            assert_eq!(RefPermission::try_parse(p.as_str()), Some(*p));
        }
        for p in ProjectPermission::all() {
            assert_eq!(ProjectPermission::try_parse(p.as_str()), Some(*p));
        }
        for p in ChangePermission::all() {
            assert_eq!(ChangePermission::try_parse(p.as_str()), Some(*p));
        }
        assert_eq!(GlobalPermission::all().len(), 19);
    }

    #[test]
    fn test_write_classification() {
        assert!(RefPermission::Update.is_write());
        assert!(!RefPermission::Read.is_write());
        assert!(ProjectPermission::WriteConfig.is_write());
        assert!(!ProjectPermission::Access.is_write());
        assert!(!ChangePermission::Read.is_write());
    }

    #[test]
    fn test_change_scope_conversions() {
        let p: ChangeScopePermission = ChangePermission::Submit.into();
        assert_eq!(p.to_string(), "submit");

        let p: ChangeScopePermission = LabelPermission::new("Code-Review").with_value(2).into();
        assert_eq!(p.to_string(), "label-Code-Review=+2");
    }
}
