//! Exact-match path exclusions

use std::fmt;

/// Paths excluded from body capture and record emission
///
/// Matching is exact string equality against the request path. There is no
/// prefix, glob or regex support.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkipPaths {
    paths: Vec<String>,
}

impl SkipPaths {
    /// Create an empty matcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path to the exclusion list
    pub fn push(&mut self, path: impl Into<String>) {
        self.paths.push(path.into());
    }

    /// Returns true when `path` equals one of the configured paths
    pub fn is_skipped(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Configured paths, in configuration order
    pub fn as_slice(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl<S: Into<String>> FromIterator<S> for SkipPaths {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for SkipPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.paths.join(","))
    }
}
