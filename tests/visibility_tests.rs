//! Ref visibility and bulk ref filtering

mod common;

use common::*;
use refgate::access_control::{ANONYMOUS_USERS, PermissionRule, ProjectState, REGISTERED_USERS};
use refgate::backend::{PermissionBackend, RefFilterOptions};
use refgate::change::{Change, ChangeId, ChangeLoadError, ChangeProvider};
use refgate::error::PermissionBackendError;
use refgate::identity::Identity;
use refgate::util::refs::{account_ref, change_ref_prefix, edit_ref};
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

fn filter(
    backend: &PermissionBackend,
    identity: Identity,
    project: &str,
    refs: &[impl AsRef<str>],
) -> Vec<String> {
    filter_with(backend, identity, project, refs, RefFilterOptions::default())
}

fn filter_with(
    backend: &PermissionBackend,
    identity: Identity,
    project: &str,
    refs: &[impl AsRef<str>],
    options: RefFilterOptions,
) -> Vec<String> {
    backend
        .user(identity)
        .project(project)
        .filter(refs.iter().map(|r| r.as_ref()), &options)
        .unwrap()
}

fn patch_set_ref(change: u32) -> String {
    format!("{}1", change_ref_prefix(change))
}

/// Registered users read master only; DEV owns change 1 on master and
/// change 2 on a branch nobody reads
fn branch_fixture() -> Fixture {
    let f = Fixture::new();
    f.allow(LOCAL, "read", REGISTERED_USERS, "refs/heads/master");
    f.add_change(change(1, LOCAL, "master", DEV));
    f.add_change(change(2, LOCAL, "secret", DEV));
    f
}

// =============================================================================
// 1. Fast path
// =============================================================================

mod fast_path {
    use super::*;

    #[test]
    fn test_all_refs_visible_returns_input_unchanged() {
        let f = Fixture::new();
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/*");
        let backend = f.backend();

        let refs = ["refs/heads/master", "refs/tags/v1", "refs/sequences/changes"];
        assert_eq!(filter(&backend, user(OTHER), LOCAL, &refs), refs);
    }

    #[test]
    fn test_full_evaluation_when_disabled() {
        let mut f = Fixture::new();
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/*");
        f.settings().skip_full_ref_evaluation = false;
        let backend = f.backend();

        let refs = ["refs/heads/master", "refs/tags/v1", "refs/sequences/changes"];
        assert_eq!(
            filter(&backend, user(OTHER), LOCAL, &refs),
            ["refs/heads/master", "refs/tags/v1"]
        );
    }

    #[test]
    fn test_config_hidden_when_only_config_is_restricted() {
        let f = Fixture::new();
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/*");
        f.allow(LOCAL, "read", devs(), "refs/meta/config");
        f.exclusive(LOCAL, "read", "refs/meta/config");
        let backend = f.backend();

        let refs = ["refs/heads/master", "refs/meta/config"];
        assert_eq!(filter(&backend, user(OTHER), LOCAL, &refs), ["refs/heads/master"]);
        assert_eq!(filter(&backend, user(DEV), LOCAL, &refs), refs);
    }

    #[test]
    fn test_all_users_never_takes_fast_path() {
        let f = Fixture::new();
        f.allow(ALL_USERS, "read", REGISTERED_USERS, "refs/*");
        f.capability("accessDatabase", PermissionRule::allow(admins()));
        let backend = f.backend();

        let refs = ["refs/heads/master", "refs/meta/external-ids"];
        assert_eq!(filter(&backend, user(DEV), ALL_USERS, &refs), ["refs/heads/master"]);
        assert_eq!(filter(&backend, user(ADMIN), ALL_USERS, &refs), refs);
    }
}

// =============================================================================
// 2. Branches and tags
// =============================================================================

mod branches_and_tags {
    use super::*;

    #[test]
    fn test_branches_filtered_by_read() {
        let backend = branch_fixture().backend();

        assert_eq!(
            filter(&backend, user(OTHER), LOCAL, &["refs/heads/master", "refs/heads/secret"]),
            ["refs/heads/master"]
        );
        assert!(filter(&backend, Identity::Anonymous, LOCAL, &["refs/heads/master"]).is_empty());
    }

    #[test]
    fn test_single_ref_visibility() {
        let backend = branch_fixture().backend();
        let visibility = backend
            .user(user(OTHER))
            .project(LOCAL)
            .ref_visibility()
            .unwrap();

        assert!(visibility.is_visible("refs/heads/master").unwrap());
        assert!(!visibility.is_visible("refs/heads/secret").unwrap());
    }

    #[test]
    fn test_single_tag_is_not_supported() {
        let backend = branch_fixture().backend();
        let visibility = backend
            .user(user(OTHER))
            .project(LOCAL)
            .ref_visibility()
            .unwrap();

        let err = visibility.is_visible("refs/tags/v1.0").unwrap_err();
        assert!(matches!(err, PermissionBackendError::TagRefNotSupported(name) if name == "refs/tags/v1.0"));
    }

    #[test]
    fn test_tags_filtered_in_bulk() {
        let f = branch_fixture();
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/tags/release/*");
        let backend = f.backend();

        assert!(filter(&backend, user(OTHER), LOCAL, &["refs/tags/v1"]).is_empty());

        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/tags/*");
        let backend = f.backend();
        assert_eq!(filter(&backend, user(OTHER), LOCAL, &["refs/tags/v1"]), ["refs/tags/v1"]);
    }

    #[test]
    fn test_hidden_project_shows_nothing_to_non_owners() {
        let f = Fixture::new();
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/*");
        f.allow(LOCAL, "owner", devs(), "refs/*");
        f.set_state(LOCAL, ProjectState::Hidden);
        let backend = f.backend();

        assert!(filter(&backend, user(OTHER), LOCAL, &["refs/heads/master"]).is_empty());
        assert_eq!(
            filter(&backend, user(DEV), LOCAL, &["refs/heads/master"]),
            ["refs/heads/master"]
        );
    }

    #[test]
    fn test_missing_project_fails() {
        let backend = Fixture::new().backend();
        let err = backend
            .user(user(DEV))
            .project("missing")
            .filter(["refs/heads/master"], &RefFilterOptions::default())
            .unwrap_err();
        assert!(err.is_repository_not_found());
    }
}

// =============================================================================
// 3. Change and edit refs
// =============================================================================

mod change_refs {
    use super::*;

    #[test]
    fn test_change_refs_follow_destination_branch() {
        let backend = branch_fixture().backend();
        let one = patch_set_ref(1);
        let two = patch_set_ref(2);

        assert_eq!(filter(&backend, user(OTHER), LOCAL, &[&one, &two]), [one.clone()]);
        assert_eq!(
            filter(&backend, user(OTHER), LOCAL, &[&format!("{}meta", change_ref_prefix(1))]),
            [format!("{}meta", change_ref_prefix(1))]
        );
    }

    #[test]
    fn test_deleted_change_visible_to_project_readers_only() {
        let mut f = Fixture::new();
        f.allow(LOCAL, "read", devs(), "refs/*");
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/heads/*");
        f.settings().skip_full_ref_evaluation = false;
        let backend = f.backend();
        let gone = patch_set_ref(99);

        assert_eq!(filter(&backend, user(DEV), LOCAL, &[&gone]), [gone.clone()]);
        assert!(filter(&backend, user(OTHER), LOCAL, &[&gone]).is_empty());
    }

    #[test]
    fn test_private_change_refs() {
        let f = branch_fixture();
        f.add_change(change(3, LOCAL, "master", DEV).with_private(true));
        let backend = f.backend();
        let three = patch_set_ref(3);

        assert_eq!(filter(&backend, user(DEV), LOCAL, &[&three]), [three.clone()]);
        assert!(filter(&backend, user(OTHER), LOCAL, &[&three]).is_empty());
    }

    #[test]
    fn test_edit_refs_visible_to_their_account_only() {
        let backend = branch_fixture().backend();
        let own = edit_ref(DEV, 1, 1);
        let hidden_change = edit_ref(DEV, 2, 1);
        let missing = edit_ref(DEV, 42, 1);

        assert_eq!(
            filter(&backend, user(DEV), LOCAL, &[&own, &hidden_change, &missing]),
            [own.clone()]
        );
        assert!(filter(&backend, user(FIXER), LOCAL, &[&own]).is_empty());
    }

    /// Change store that cannot be read
    struct OfflineChanges;

    impl ChangeProvider for OfflineChanges {
        fn load_change(&self, _project: &str, id: ChangeId) -> Result<Arc<Change>, ChangeLoadError> {
            Err(ChangeLoadError::storage(id, "database offline"))
        }
    }

    #[test]
    fn test_unreadable_change_fails_single_check() {
        let f = branch_fixture();
        let backend = f.backend_with(f.store.clone(), Arc::new(OfflineChanges));
        let visibility = backend
            .user(user(OTHER))
            .project(LOCAL)
            .ref_visibility()
            .unwrap();

        let err = visibility.is_visible(&patch_set_ref(1)).unwrap_err();
        assert_eq!(err.to_string(), "cannot load change 1");
        assert!(!err.is_repository_not_found());
    }

    #[test]
    fn test_unreadable_change_hidden_in_bulk() {
        let f = branch_fixture();
        let backend = f.backend_with(f.store.clone(), Arc::new(OfflineChanges));
        let one = patch_set_ref(1);

        assert_eq!(
            filter(&backend, user(OTHER), LOCAL, &["refs/heads/master", one.as_str()]),
            ["refs/heads/master"]
        );
    }

    #[test]
    fn test_filter_meta_drops_change_and_edit_refs() {
        let backend = branch_fixture().backend();
        let one = patch_set_ref(1);
        let edit = edit_ref(DEV, 1, 1);
        let refs = ["refs/heads/master", one.as_str(), edit.as_str()];

        assert_eq!(filter(&backend, user(DEV), LOCAL, &refs).len(), 3);
        assert_eq!(
            filter_with(
                &backend,
                user(DEV),
                LOCAL,
                &refs,
                RefFilterOptions::default().filter_meta(true)
            ),
            ["refs/heads/master"]
        );
    }
}

// =============================================================================
// 4. Server metadata
// =============================================================================

mod metadata {
    use super::*;

    #[test]
    fn test_account_refs_visible_to_owner_only() {
        let f = branch_fixture();
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/users/*");
        let backend = f.backend();
        let dev = account_ref(DEV);
        let fixer = account_ref(FIXER);

        assert_eq!(filter(&backend, user(DEV), LOCAL, &[&dev, &fixer]), [dev.clone()]);
        assert!(filter(&backend, Identity::Anonymous, LOCAL, &[&dev]).is_empty());
    }

    #[test]
    fn test_sequences_need_access_database() {
        let f = branch_fixture();
        f.capability("accessDatabase", PermissionRule::allow(admins()));
        let backend = f.backend();
        let refs = ["refs/sequences/changes"];

        assert!(filter(&backend, user(DEV), LOCAL, &refs).is_empty());
        assert_eq!(filter(&backend, user(ADMIN), LOCAL, &refs), refs);
        assert_eq!(filter(&backend, Identity::Internal, LOCAL, &refs), refs);
    }

    #[test]
    fn test_automerge_refs_always_hidden() {
        let mut f = Fixture::new();
        f.allow(LOCAL, "read", ANONYMOUS_USERS, "refs/*");
        f.settings().skip_full_ref_evaluation = false;
        let backend = f.backend();

        let refs = ["refs/cache-automerge/ab/cdef", "refs/heads/master"];
        assert_eq!(filter(&backend, Identity::Internal, LOCAL, &refs), ["refs/heads/master"]);
    }

    #[test]
    fn test_unknown_server_refs_hidden() {
        let backend = branch_fixture().backend();
        assert!(
            filter(&backend, user(DEV), LOCAL, &["refs/draft-comments/01/1/2"]).is_empty()
        );
    }
}

// =============================================================================
// 5. Section ordering
// =============================================================================

mod section_ordering {
    use super::*;

    #[test]
    fn test_many_branches_share_cached_orderings() {
        let mut f = Fixture::new();
        f.allow(LOCAL, "read", devs(), "refs/*");
        f.allow(LOCAL, "read", REGISTERED_USERS, "refs/heads/*");
        f.settings().skip_full_ref_evaluation = false;
        let backend = f.backend();

        let few: Vec<String> = (0..3).map(|i| format!("refs/heads/topic-{}", i)).collect();
        assert_eq!(filter(&backend, user(OTHER), LOCAL, &few), few);
        let entries = f.sort_cache.len();
        assert!(entries > 0);

        let many: Vec<String> = (0..500).map(|i| format!("refs/heads/feature-{}", i)).collect();
        assert_eq!(filter(&backend, user(OTHER), LOCAL, &many).len(), many.len());
        assert_eq!(f.sort_cache.len(), entries);
    }
}
