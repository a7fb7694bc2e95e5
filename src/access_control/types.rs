//! Access control types
//!
//! Core types used by the access control system: rules, the permissions
//! grouping them, and the ref-pattern scoped sections of a project.

use crate::access_control::groups::GroupUuid;
use crate::access_control::patterns::RefPattern;
use crate::error::ConfigError;
use crate::permissions::names;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a rule does for its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    /// Shadows allow rules for the same group in this and inherited sections
    Deny,
    /// Cannot be overridden from descendant projects
    Block,
}

impl RuleAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
            RuleAction::Block => "block",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(RuleAction::Allow),
            "deny" => Some(RuleAction::Deny),
            "block" => Some(RuleAction::Block),
            _ => None,
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One group's grant, denial or block of a permission
///
/// The textual form follows project configuration files:
/// `[allow|deny|block] [+force] [-N..+M] group <uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionRule {
    group: GroupUuid,
    action: RuleAction,
    force: bool,
    min: i32,
    max: i32,
}

impl PermissionRule {
    pub fn new(group: GroupUuid, action: RuleAction) -> Self {
        Self {
            group,
            action,
            force: false,
            min: 0,
            max: 0,
        }
    }

    pub fn allow(group: GroupUuid) -> Self {
        Self::new(group, RuleAction::Allow)
    }

    pub fn deny(group: GroupUuid) -> Self {
        Self::new(group, RuleAction::Deny)
    }

    pub fn block(group: GroupUuid) -> Self {
        Self::new(group, RuleAction::Block)
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Vote range; callers must keep `min <= max`.
    pub fn with_range(mut self, min: i32, max: i32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn group(&self) -> &GroupUuid {
        &self.group
    }

    pub fn action(&self) -> RuleAction {
        self.action
    }

    pub fn is_force(&self) -> bool {
        self.force
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn is_allow(&self) -> bool {
        self.action == RuleAction::Allow
    }

    pub fn is_deny(&self) -> bool {
        self.action == RuleAction::Deny
    }

    pub fn is_block(&self) -> bool {
        self.action == RuleAction::Block
    }

    fn has_range(&self) -> bool {
        self.min != 0 || self.max != 0
    }
}

fn parse_vote(raw: &str, rule: &str) -> Result<i32, ConfigError> {
    raw.trim_start_matches('+')
        .parse()
        .map_err(|_| ConfigError::invalid_rule(rule, format!("invalid vote value '{}'", raw)))
}

impl FromStr for PermissionRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace().peekable();

        let action = match tokens.peek().and_then(|t| RuleAction::try_parse(t)) {
            Some(action) => {
                tokens.next();
                action
            }
            None => RuleAction::Allow,
        };

        let mut force = false;
        let mut range = None;
        loop {
            match tokens.next() {
                Some("+force") => force = true,
                Some("group") => break,
                Some(token) if token.contains("..") => {
                    let (lo, hi) = token
                        .split_once("..")
                        .ok_or_else(|| ConfigError::invalid_rule(s, "malformed range"))?;
                    range = Some((parse_vote(lo, s)?, parse_vote(hi, s)?));
                }
                Some(token) => {
                    return Err(ConfigError::invalid_rule(
                        s,
                        format!("unexpected token '{}'", token),
                    ));
                }
                None => return Err(ConfigError::invalid_rule(s, "missing 'group <uuid>'")),
            }
        }

        let group = tokens.collect::<Vec<_>>().join(" ");
        if group.is_empty() {
            return Err(ConfigError::invalid_rule(s, "missing group"));
        }

        let mut rule = PermissionRule::new(GroupUuid::new(group), action).with_force(force);
        if let Some((min, max)) = range {
            if min > max {
                return Err(ConfigError::invalid_rule(
                    s,
                    format!("range minimum {} exceeds maximum {}", min, max),
                ));
            }
            rule = rule.with_range(min, max);
        }
        Ok(rule)
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action != RuleAction::Allow {
            write!(f, "{} ", self.action)?;
        }
        if self.force {
            f.write_str("+force ")?;
        }
        if self.has_range() {
            write!(f, "{}..{} ", format_vote(self.min), format_vote(self.max))?;
        }
        write!(f, "group {}", self.group)
    }
}

fn format_vote(value: i32) -> String {
    if value > 0 {
        format!("+{}", value)
    } else {
        value.to_string()
    }
}

/// The rules of one permission within one access section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    name: String,
    exclusive: bool,
    rules: Vec<PermissionRule>,
}

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exclusive: false,
            rules: Vec::new(),
        }
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_rule(mut self, rule: PermissionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn add_rule(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    pub fn set_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn rules(&self) -> &[PermissionRule] {
        &self.rules
    }

    /// Whether rules of this permission carry vote ranges
    pub fn has_range(&self) -> bool {
        names::has_range(&self.name)
    }
}

/// A ref-pattern scoped group of permissions within a project
#[derive(Debug, Clone)]
pub struct AccessSection {
    pattern: RefPattern,
    permissions: Vec<Permission>,
}

impl AccessSection {
    /// Create an empty section; the pattern is validated here.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            pattern: RefPattern::new(pattern)?,
            permissions: Vec::new(),
        })
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn pattern(&self) -> &RefPattern {
        &self.pattern
    }

    pub fn name(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn permission(&self, name: &str) -> Option<&Permission> {
        self.permissions.iter().find(|p| p.name() == name)
    }

    /// Permission `name`, created empty if missing.
    pub fn permission_mut(&mut self, name: &str) -> &mut Permission {
        let index = match self.permissions.iter().position(|p| p.name() == name) {
            Some(index) => index,
            None => {
                self.permissions.push(Permission::new(name));
                self.permissions.len() - 1
            }
        };
        &mut self.permissions[index]
    }
}

/// Inclusive vote interval a user may cast for a label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PermissionRange {
    name: String,
    min: i32,
    max: i32,
}

impl PermissionRange {
    pub fn new(name: impl Into<String>, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Range permitting only the neutral vote
    pub fn neutral(name: impl Into<String>) -> Self {
        Self::new(name, 0, 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn contains(&self, value: i32) -> bool {
        self.min <= value && value <= self.max
    }

    /// Whether any non-neutral vote is possible
    pub fn allows_any_vote(&self) -> bool {
        self.min <= self.max && (self.min < 0 || self.max > 0)
    }

    /// Clamp `value` into the range
    pub fn squash(&self, value: i32) -> i32 {
        if self.min > self.max {
            return 0;
        }
        value.clamp(self.min, self.max)
    }
}

impl fmt::Display for PermissionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}..{}",
            self.name,
            format_vote(self.min),
            format_vote(self.max)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_allow() {
        let rule: PermissionRule = "group devs".parse().unwrap();
        assert_eq!(rule.action(), RuleAction::Allow);
        assert_eq!(rule.group(), &GroupUuid::new("devs"));
        assert!(!rule.is_force());
    }

    #[test]
    fn test_parse_block_force_range() {
        let rule: PermissionRule = "block +force -2..+2 group global:Anonymous-Users"
            .parse()
            .unwrap();
        assert!(rule.is_block());
        assert!(rule.is_force());
        assert_eq!((rule.min(), rule.max()), (-2, 2));
        assert_eq!(rule.group().as_str(), "global:Anonymous-Users");
    }

    #[test]
    fn test_parse_group_with_spaces() {
        let rule: PermissionRule = "deny group Release Managers".parse().unwrap();
        assert!(rule.is_deny());
        assert_eq!(rule.group().as_str(), "Release Managers");
    }

    #[test]
    fn test_parse_errors() {
        assert!("allow devs".parse::<PermissionRule>().is_err());
        assert!("allow group".parse::<PermissionRule>().is_err());
        assert!("+2..-2 group devs".parse::<PermissionRule>().is_err());
        assert!("a..b group devs".parse::<PermissionRule>().is_err());
    }

    #[test]
    fn test_rule_display_round_trip() {
        for text in [
            "group devs",
            "block +force group devs",
            "-1..+1 group devs",
            "deny group devs",
        ] {
            let rule: PermissionRule = text.parse().unwrap();
            assert_eq!(rule.to_string(), text);
        }
    }

    #[test]
    fn test_permission_mut_creates_once() {
        let mut section = AccessSection::new("refs/heads/*").unwrap();
        section
            .permission_mut("push")
            .add_rule(PermissionRule::allow(GroupUuid::new("devs")));
        section
            .permission_mut("push")
            .add_rule(PermissionRule::block(GroupUuid::new("bots")));
        assert_eq!(section.permissions().len(), 1);
        assert_eq!(section.permission("push").unwrap().rules().len(), 2);
        assert!(section.permission("read").is_none());
    }

    #[test]
    fn test_range_queries() {
        let range = PermissionRange::new("label-Code-Review", -1, 2);
        assert!(range.contains(-1));
        assert!(!range.contains(-2));
        assert!(range.allows_any_vote());
        assert_eq!(range.squash(5), 2);
        assert_eq!(range.to_string(), "label-Code-Review -1..+2");

        assert!(!PermissionRange::neutral("label-Verified").allows_any_vote());
        assert!(!PermissionRange::new("label-X", 1, -1).contains(0));
    }
}
