//! Label vote permissions

use crate::permissions::names;
use std::fmt;
use std::ops::RangeInclusive;

/// Permission to vote on a label, optionally on behalf of another user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelPermission {
    label: String,
    on_behalf_of: bool,
}

impl LabelPermission {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            on_behalf_of: false,
        }
    }

    /// Vote on the label in the name of another user
    pub fn on_behalf_of(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            on_behalf_of: true,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_on_behalf_of(&self) -> bool {
        self.on_behalf_of
    }

    /// Name of the permission rules are configured under
    pub fn permission_name(&self) -> String {
        let prefix = if self.on_behalf_of {
            names::LABEL_AS
        } else {
            names::LABEL
        };
        format!("{}{}", prefix, self.label)
    }

    pub fn with_value(&self, value: i32) -> LabelPermissionWithValue {
        LabelPermissionWithValue {
            permission: self.clone(),
            value,
        }
    }

    pub fn describe(&self) -> String {
        if self.on_behalf_of {
            format!("label {} on behalf of other users", self.label)
        } else {
            format!("label {}", self.label)
        }
    }

    /// Parse `label-NAME` or `labelAs-NAME`
    pub fn try_parse(s: &str) -> Option<Self> {
        if let Some(label) = s.strip_prefix(names::LABEL_AS) {
            return (!label.is_empty()).then(|| Self::on_behalf_of(label));
        }
        s.strip_prefix(names::LABEL)
            .filter(|label| !label.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for LabelPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.permission_name())
    }
}

/// Permission to cast one specific vote on a label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelPermissionWithValue {
    permission: LabelPermission,
    value: i32,
}

impl LabelPermissionWithValue {
    pub fn new(label: impl Into<String>, value: i32) -> Self {
        LabelPermission::new(label).with_value(value)
    }

    pub fn permission(&self) -> &LabelPermission {
        &self.permission
    }

    pub fn label(&self) -> &str {
        self.permission.label()
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn describe(&self) -> String {
        format!("{} with value {}", self.permission.describe(), format_value(self.value))
    }

    /// Parse `label-NAME=VALUE` (value may carry a sign)
    pub fn try_parse(s: &str) -> Option<Self> {
        let (name, value) = s.rsplit_once('=')?;
        let value = value.trim_start_matches('+').parse().ok()?;
        Some(LabelPermission::try_parse(name)?.with_value(value))
    }
}

impl fmt::Display for LabelPermissionWithValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.permission, format_value(self.value))
    }
}

fn format_value(value: i32) -> String {
    if value > 0 {
        format!("+{}", value)
    } else {
        value.to_string()
    }
}

/// A label with the votes it accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelType {
    name: String,
    values: Vec<i32>,
}

impl LabelType {
    pub fn new(name: impl Into<String>, values: RangeInclusive<i32>) -> Self {
        Self {
            name: name.into(),
            values: values.collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Every vote permission of this label
    pub fn permissions(&self) -> impl Iterator<Item = LabelPermissionWithValue> + '_ {
        let permission = LabelPermission::new(self.name.clone());
        self.values.iter().map(move |v| permission.with_value(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_names() {
        assert_eq!(
            LabelPermission::new("Code-Review").permission_name(),
            "label-Code-Review"
        );
        assert_eq!(
            LabelPermission::on_behalf_of("Code-Review").permission_name(),
            "labelAs-Code-Review"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            LabelPermission::try_parse("labelAs-Verified"),
            Some(LabelPermission::on_behalf_of("Verified"))
        );
        assert_eq!(LabelPermission::try_parse("label-"), None);
        assert_eq!(LabelPermission::try_parse("push"), None);

        let vote = LabelPermissionWithValue::try_parse("label-Code-Review=+2").unwrap();
        assert_eq!(vote.label(), "Code-Review");
        assert_eq!(vote.value(), 2);
        assert_eq!(
            LabelPermissionWithValue::try_parse("label-Code-Review=-1").map(|v| v.value()),
            Some(-1)
        );
    }

    #[test]
    fn test_label_type_permissions() {
        let label = LabelType::new("Verified", -1..=1);
        let values: Vec<i32> = label.permissions().map(|p| p.value()).collect();
        assert_eq!(values, vec![-1, 0, 1]);
    }

    #[test]
    fn test_describe() {
        let vote = LabelPermissionWithValue::new("Code-Review", -2);
        assert_eq!(vote.describe(), "label Code-Review with value -2");
        assert_eq!(vote.to_string(), "label-Code-Review=-2");
    }
}
