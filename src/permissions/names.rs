//! Permission names as they appear in project configuration

pub const OWNER: &str = "owner";
pub const READ: &str = "read";
pub const PUSH: &str = "push";
pub const PUSH_MERGE: &str = "pushMerge";
pub const CREATE: &str = "create";
pub const CREATE_TAG: &str = "createTag";
pub const CREATE_SIGNED_TAG: &str = "createSignedTag";
pub const DELETE: &str = "delete";
pub const FORGE_AUTHOR: &str = "forgeAuthor";
pub const FORGE_COMMITTER: &str = "forgeCommitter";
pub const FORGE_SERVER: &str = "forgeServerAsCommitter";
pub const SUBMIT: &str = "submit";
pub const SUBMIT_AS: &str = "submitAs";
pub const REBASE: &str = "rebase";
pub const REVERT: &str = "revert";
pub const ABANDON: &str = "abandon";
pub const ADD_PATCH_SET: &str = "addPatchSet";
pub const EDIT_TOPIC_NAME: &str = "editTopicName";
pub const EDIT_HASHTAGS: &str = "editHashtags";
pub const EDIT_ASSIGNEE: &str = "editAssignee";
pub const REMOVE_REVIEWER: &str = "removeReviewer";
pub const DELETE_CHANGES: &str = "deleteChanges";
pub const DELETE_OWN_CHANGES: &str = "deleteOwnChanges";
pub const VIEW_PRIVATE_CHANGES: &str = "viewPrivateChanges";
pub const TOGGLE_WIP_STATE: &str = "toggleWipState";

/// Prefix of label vote permissions (`label-Code-Review`)
pub const LABEL: &str = "label-";
/// Prefix of on-behalf-of label vote permissions (`labelAs-Code-Review`)
pub const LABEL_AS: &str = "labelAs-";

const REF_PERMISSIONS: &[&str] = &[
    OWNER,
    READ,
    PUSH,
    PUSH_MERGE,
    CREATE,
    CREATE_TAG,
    CREATE_SIGNED_TAG,
    DELETE,
    FORGE_AUTHOR,
    FORGE_COMMITTER,
    FORGE_SERVER,
    SUBMIT,
    SUBMIT_AS,
    REBASE,
    REVERT,
    ABANDON,
    ADD_PATCH_SET,
    EDIT_TOPIC_NAME,
    EDIT_HASHTAGS,
    EDIT_ASSIGNEE,
    REMOVE_REVIEWER,
    DELETE_CHANGES,
    DELETE_OWN_CHANGES,
    VIEW_PRIVATE_CHANGES,
    TOGGLE_WIP_STATE,
];

pub fn is_label(name: &str) -> bool {
    name.strip_prefix(LABEL).is_some_and(|l| !l.is_empty())
}

pub fn is_label_as(name: &str) -> bool {
    name.strip_prefix(LABEL_AS).is_some_and(|l| !l.is_empty())
}

/// Label-style permissions carry vote ranges
pub fn has_range(name: &str) -> bool {
    is_label(name) || is_label_as(name)
}

/// Whether `name` may be used in an access section
pub fn is_valid(name: &str) -> bool {
    REF_PERMISSIONS.contains(&name) || has_range(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_names() {
        assert!(is_label("label-Code-Review"));
        assert!(!is_label("label-"));
        assert!(is_label_as("labelAs-Verified"));
        assert!(!is_label("labelAs-Verified"));
        assert!(has_range("labelAs-Verified"));
        assert!(!has_range(PUSH));
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid(PUSH));
        assert!(is_valid("label-Code-Review"));
        assert!(!is_valid("pushh"));
        assert!(!is_valid(""));
    }
}
