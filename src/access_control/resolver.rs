//! Access control resolver
//!
//! Resolution happens in two steps:
//!
//! 1. [`AccessResolver::relevant`] collects every section of the project chain
//!    whose pattern matches the ref, orders them from most to least specific
//!    (nearer projects first on ties) and filters their rules into a
//!    [`RelevantRules`] collection.
//! 2. [`RelevantRules`] answers questions for one group membership: is a
//!    permission blocked, can it be performed, which vote range applies.
//!
//! Filtering applies the override rules:
//! - a DENY rule hides ALLOW rules for the same pattern, permission and group
//!   in the same section and in ancestor projects
//! - once an exclusive permission has been seen, less specific ALLOW rules
//!   for the same permission are ignored
//! - BLOCK rules are kept per project level and can only be lifted by an ALLOW
//!   in the same permission, or by an exclusive ALLOW ranked above them in
//!   the same project

use crate::access_control::groups::{GroupMembership, GroupUuid};
use crate::access_control::patterns::{self, RefPattern};
use crate::access_control::project::ProjectChain;
use crate::access_control::sort::SectionSortCache;
use crate::access_control::types::{AccessSection, Permission, PermissionRange, PermissionRule};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access is allowed
    Allowed,
    /// No rule grants the permission
    Denied(String),
    /// A BLOCK rule applies and was not lifted
    Blocked(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, AccessDecision::Blocked(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AccessDecision::Allowed => None,
            AccessDecision::Denied(reason) | AccessDecision::Blocked(reason) => Some(reason),
        }
    }
}

/// Builds the rule collections permissions are evaluated against
#[derive(Debug, Clone)]
pub struct AccessResolver {
    sort_cache: Arc<SectionSortCache>,
}

/// A matching section together with the project level it came from
struct Candidate<'a> {
    level: usize,
    pattern: Cow<'a, RefPattern>,
    section: &'a AccessSection,
}

impl AccessResolver {
    pub fn new(sort_cache: Arc<SectionSortCache>) -> Self {
        Self { sort_cache }
    }

    pub fn sort_cache(&self) -> &Arc<SectionSortCache> {
        &self.sort_cache
    }

    /// Collect the rules of `chain` that apply to `ref_name`.
    ///
    /// `ref_name` may itself be a pattern (`refs/heads/*` or a regular
    /// expression), in which case sections are matched against a
    /// representative ref. `username` expands `${username}` in sections and
    /// in `ref_name`; without it parameterized sections never apply.
    pub fn relevant(
        &self,
        chain: &ProjectChain,
        ref_name: &str,
        username: Option<&str>,
    ) -> RelevantRules {
        let expanded = match username {
            Some(user) if ref_name.contains(patterns::USERNAME_PLACEHOLDER) => {
                Cow::Owned(ref_name.replace(patterns::USERNAME_PLACEHOLDER, user))
            }
            _ => Cow::Borrowed(ref_name),
        };
        let target = patterns::representative_ref(&expanded);

        let mut candidates = Vec::new();
        for (level, project) in chain.iter().enumerate() {
            for section in project.sections() {
                if let Some(pattern) = section.pattern().for_user(username)
                    && pattern.matches(&target)
                {
                    candidates.push(Candidate {
                        level,
                        pattern,
                        section,
                    });
                }
            }
        }

        let projects = chain.names();
        let candidates = self
            .sort_cache
            .sort(&target, &projects, candidates, |c| &*c.pattern);

        let is_pattern = patterns::is_regex(ref_name) || ref_name.ends_with("/*");
        let rules = RelevantRules::collect(ref_name, &candidates, !is_pattern);

        debug!(
            project = chain.target().name(),
            ref_name,
            sections = candidates.len(),
            "Collected relevant access rules"
        );

        rules
    }
}

/// Rules applying to a single ref, ordered from most to least specific
#[derive(Debug, Clone, Default)]
pub struct RelevantRules {
    ref_name: String,
    /// ALLOW rules that survived filtering, per permission name
    allows: HashMap<String, Vec<PermissionRule>>,
    /// Permissions with BLOCK rules or the exclusive flag, per permission
    /// name and project level, nearest project first
    blocks: HashMap<String, Vec<Vec<Permission>>>,
}

impl RelevantRules {
    fn collect(ref_name: &str, candidates: &[Candidate<'_>], honor_exclusive: bool) -> Self {
        let mut seen: HashSet<(&str, &str, &GroupUuid)> = HashSet::new();
        let mut exclusive: HashSet<&str> = HashSet::new();
        let mut exclusive_levels: HashSet<(usize, &str)> = HashSet::new();
        let mut allows: HashMap<String, Vec<PermissionRule>> = HashMap::new();
        let mut blocks: HashMap<String, BTreeMap<usize, Vec<Permission>>> = HashMap::new();

        for candidate in candidates {
            let pattern = candidate.pattern.as_str();
            for permission in candidate.section.permissions() {
                let name = permission.name();
                let hidden = honor_exclusive && exclusive.contains(name);
                let level_exclusive = exclusive_levels.contains(&(candidate.level, name));

                for rule in permission.rules().iter().filter(|r| r.is_deny()) {
                    seen.insert((pattern, name, rule.group()));
                }

                for rule in permission.rules().iter().filter(|r| r.is_allow()) {
                    if seen.insert((pattern, name, rule.group())) && !hidden {
                        allows.entry(name.to_string()).or_default().push(rule.clone());
                    }
                }

                let has_block = permission.rules().iter().any(|r| r.is_block());
                if (has_block || permission.is_exclusive()) && !level_exclusive {
                    blocks
                        .entry(name.to_string())
                        .or_default()
                        .entry(candidate.level)
                        .or_default()
                        .push(permission.clone());
                }

                if permission.is_exclusive() {
                    exclusive.insert(name);
                    exclusive_levels.insert((candidate.level, name));
                }
            }
        }

        Self {
            ref_name: ref_name.to_string(),
            allows,
            blocks: blocks
                .into_iter()
                .map(|(name, levels)| (name, levels.into_values().collect()))
                .collect(),
        }
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    /// ALLOW rules that survived filtering for `name`
    pub fn allow_rules(&self, name: &str) -> &[PermissionRule] {
        self.allows.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    fn block_levels(&self, name: &str) -> &[Vec<Permission>] {
        self.blocks.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether a BLOCK rule denies `name` to `groups`
    pub fn is_blocked(&self, name: &str, groups: &GroupMembership, with_force: bool) -> bool {
        'levels: for level in self.block_levels(name) {
            for permission in level {
                let lifting = lifting_allow(permission, groups, with_force);
                if permission.is_exclusive() && lifting.is_some() {
                    continue 'levels;
                }
                if has_block(permission, groups, with_force) && lifting.is_none() {
                    trace!(
                        permission = name,
                        ref_name = %self.ref_name,
                        "Permission blocked"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Whether `groups` may perform `name`, optionally with force
    pub fn can_perform(&self, name: &str, groups: &GroupMembership, with_force: bool) -> bool {
        self.check(name, groups, with_force).is_allowed()
    }

    pub fn check(&self, name: &str, groups: &GroupMembership, with_force: bool) -> AccessDecision {
        let decision = if self.is_blocked(name, groups, with_force) {
            AccessDecision::Blocked(format!("{} is blocked on {}", name, self.ref_name))
        } else if self
            .allow_rules(name)
            .iter()
            .any(|r| is_allow(r, with_force) && groups.contains(r.group()))
        {
            AccessDecision::Allowed
        } else {
            AccessDecision::Denied(format!("{} is not granted on {}", name, self.ref_name))
        };

        trace!(
            permission = name,
            ref_name = %self.ref_name,
            with_force,
            decision = ?decision,
            "Evaluated permission"
        );
        decision
    }

    /// Vote range `groups` may cast for the label permission `name`.
    ///
    /// The range is the union of every matching ALLOW range, clipped by the
    /// intersection of what each project level's BLOCK rules leave open.
    pub fn range(&self, name: &str, groups: &GroupMembership) -> PermissionRange {
        let (mut open_min, mut open_max) = (i32::MIN, i32::MAX);

        'levels: for level in self.block_levels(name) {
            let (mut level_min, mut level_max) = (i32::MIN, i32::MAX);
            for permission in level {
                let lifting = lifting_allow(permission, groups, false);
                if permission.is_exclusive() && lifting.is_some() {
                    continue 'levels;
                }

                let block = permission
                    .rules()
                    .iter()
                    .rev()
                    .find(|r| is_block(r, false) && groups.contains(r.group()));
                if let Some(block) = block {
                    (level_min, level_max) = match lifting {
                        Some(allow) => (allow.min(), allow.max()),
                        None => (block.min().saturating_add(1), block.max().saturating_sub(1)),
                    };
                    break;
                }
            }
            open_min = open_min.max(level_min);
            open_max = open_max.min(level_max);
        }

        let (mut vote_min, mut vote_max) = (0, 0);
        for rule in self.allow_rules(name) {
            if is_allow(rule, false) && groups.contains(rule.group()) {
                vote_min = vote_min.min(rule.min());
                vote_max = vote_max.max(rule.max());
            }
        }

        PermissionRange::new(name, vote_min.max(open_min), vote_max.min(open_max))
    }
}

/// A force ALLOW grants both plain and forced operations
fn is_allow(rule: &PermissionRule, with_force: bool) -> bool {
    rule.is_allow() && (rule.is_force() || !with_force)
}

/// A force BLOCK only applies to forced operations
fn is_block(rule: &PermissionRule, with_force: bool) -> bool {
    rule.is_block() && (!rule.is_force() || with_force)
}

fn has_block(permission: &Permission, groups: &GroupMembership, with_force: bool) -> bool {
    permission
        .rules()
        .iter()
        .any(|r| is_block(r, with_force) && groups.contains(r.group()))
}

/// An ALLOW in `permission` matching `groups` whose group is not itself
/// blocked in the same permission
fn lifting_allow<'p>(
    permission: &'p Permission,
    groups: &GroupMembership,
    with_force: bool,
) -> Option<&'p PermissionRule> {
    let blocked: Vec<&GroupUuid> = permission
        .rules()
        .iter()
        .filter(|r| is_block(r, with_force) && groups.contains(r.group()))
        .map(PermissionRule::group)
        .collect();

    permission.rules().iter().find(|r| {
        is_allow(r, with_force) && groups.contains(r.group()) && !blocked.contains(&r.group())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::groups::{ANONYMOUS_USERS, REGISTERED_USERS};
    use crate::access_control::project::{Project, ProjectStore};
    use crate::identity::Identity;

    fn devs() -> GroupUuid {
        GroupUuid::new("devs")
    }

    fn section(pattern: &str, permission: Permission) -> AccessSection {
        AccessSection::new(pattern).unwrap().with_permission(permission)
    }

    fn resolve(projects: Vec<Project>, ref_name: &str) -> RelevantRules {
        let store = ProjectStore::new();
        for project in projects {
            store.insert(project);
        }
        let chain = ProjectChain::resolve(&store, "local", "All-Projects").unwrap();
        AccessResolver::new(Arc::new(SectionSortCache::new())).relevant(&chain, ref_name, None)
    }

    fn dev_groups() -> GroupMembership {
        GroupMembership::for_identity(&Identity::account(1), [devs()])
    }

    #[test]
    fn test_allow_grants() {
        let rules = resolve(
            vec![
                Project::new("All-Projects"),
                Project::new("local").with_section(section(
                    "refs/heads/*",
                    Permission::new("push").with_rule(PermissionRule::allow(devs())),
                )),
            ],
            "refs/heads/master",
        );
        assert!(rules.can_perform("push", &dev_groups(), false));
        assert!(!rules.can_perform("push", &dev_groups(), true));
        assert!(!rules.can_perform("push", &GroupMembership::anonymous(), false));
    }

    #[test]
    fn test_parent_block_wins() {
        let rules = resolve(
            vec![
                Project::new("All-Projects").with_section(section(
                    "refs/heads/*",
                    Permission::new("push").with_rule(PermissionRule::block(ANONYMOUS_USERS)),
                )),
                Project::new("local").with_section(section(
                    "refs/heads/*",
                    Permission::new("push").with_rule(PermissionRule::allow(devs())),
                )),
            ],
            "refs/heads/master",
        );
        let decision = rules.check("push", &dev_groups(), false);
        assert!(decision.is_blocked());
        assert!(decision.reason().unwrap().contains("refs/heads/master"));
    }

    #[test]
    fn test_exclusive_allow_lifts_block_in_same_project() {
        let local = Project::new("local")
            .with_section(section(
                "refs/heads/*",
                Permission::new("push").with_rule(PermissionRule::block(ANONYMOUS_USERS)),
            ))
            .with_section(section(
                "refs/heads/master",
                Permission::new("push")
                    .with_exclusive(true)
                    .with_rule(PermissionRule::allow(devs())),
            ));
        let projects = vec![Project::new("All-Projects"), local];

        let master = resolve(projects.clone(), "refs/heads/master");
        assert!(master.can_perform("push", &dev_groups(), false));

        let other = resolve(projects, "refs/heads/other");
        assert!(!other.can_perform("push", &dev_groups(), false));
    }

    #[test]
    fn test_deny_shadows_same_pattern_in_parent() {
        let rules = resolve(
            vec![
                Project::new("All-Projects").with_section(section(
                    "refs/*",
                    Permission::new("read").with_rule(PermissionRule::allow(REGISTERED_USERS)),
                )),
                Project::new("local").with_section(section(
                    "refs/*",
                    Permission::new("read").with_rule(PermissionRule::deny(REGISTERED_USERS)),
                )),
            ],
            "refs/heads/master",
        );
        let decision = rules.check("read", &dev_groups(), false);
        assert_eq!(
            decision,
            AccessDecision::Denied("read is not granted on refs/heads/master".to_string())
        );
    }

    #[test]
    fn test_range_union_and_block_clip() {
        let label = "label-Code-Review";
        let rules = resolve(
            vec![
                Project::new("All-Projects").with_section(section(
                    "refs/heads/*",
                    Permission::new(label)
                        .with_rule(PermissionRule::block(REGISTERED_USERS).with_range(-2, 2)),
                )),
                Project::new("local").with_section(section(
                    "refs/heads/*",
                    Permission::new(label)
                        .with_rule(PermissionRule::allow(devs()).with_range(-1, 1))
                        .with_rule(PermissionRule::allow(REGISTERED_USERS).with_range(-2, 2)),
                )),
            ],
            "refs/heads/master",
        );
        let range = rules.range(label, &dev_groups());
        assert_eq!((range.min(), range.max()), (-1, 1));
    }

    #[test]
    fn test_no_rules_is_neutral_range() {
        let rules = resolve(
            vec![Project::new("All-Projects"), Project::new("local")],
            "refs/heads/master",
        );
        let range = rules.range("label-Verified", &dev_groups());
        assert!(!range.allows_any_vote());
        assert!(range.contains(0));
        assert!(rules.allow_rules("push").is_empty());
    }
}
