//! Utility functions shared across the crate.

pub mod refs;

use std::fmt::Display;

/// Builder for REST-style resource paths.
///
/// Every segment added with [`ResourcePath::encoded`] is URL encoded, so
/// project names containing `/` stay a single path segment.
///
/// # Example
/// ```ignore
/// let path = ResourcePath::new("projects")
///     .encoded("team/app")
///     .literal("+refs")
///     .raw("refs/heads/master")
///     .build();
/// // Returns "/projects/team%2Fapp/+refs/refs/heads/master"
/// ```
#[derive(Debug, Default)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// Start a path with a collection name.
    pub fn new(collection: &str) -> Self {
        Self {
            segments: vec![collection.to_string()],
        }
    }

    /// Append a fixed segment as-is.
    pub fn literal(mut self, segment: &str) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    /// Append a URL-encoded segment.
    pub fn encoded(mut self, segment: impl Display) -> Self {
        self.segments
            .push(urlencoding::encode(&segment.to_string()).into_owned());
        self
    }

    /// Append a value that keeps its slashes (ref names).
    pub fn raw(mut self, value: &str) -> Self {
        self.segments.push(value.to_string());
        self
    }

    pub fn build(self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_path_encodes_project() {
        let path = ResourcePath::new("projects")
            .encoded("team/app")
            .literal("+refs")
            .raw("refs/heads/master")
            .build();
        assert_eq!(path, "/projects/team%2Fapp/+refs/refs/heads/master");
    }

    #[test]
    fn test_resource_path_numbers() {
        let path = ResourcePath::new("projects")
            .encoded("p")
            .literal("+changes")
            .encoded(42)
            .build();
        assert_eq!(path, "/projects/p/+changes/42");
    }
}
