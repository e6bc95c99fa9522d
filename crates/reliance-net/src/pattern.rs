//! Path patterns for request classification.

use reliance_common::path_is_within;

/// Pattern matched against a URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of path pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact path match.
    Exact,
    /// Raw string prefix match (`/_next/image` also matches `/_next/image?url=`).
    Prefix,
    /// The path itself or anything nested under it, segment-aware.
    Within,
    /// File extension of the last segment, case-insensitive.
    Extension,
}

impl PathPattern {
    /// Create an exact match pattern.
    pub fn exact(path: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: path.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a segment-aware subtree pattern.
    pub fn within(base: &str) -> Self {
        Self {
            pattern_type: PatternType::Within,
            pattern: base.to_string(),
        }
    }

    /// Create an extension pattern; a leading dot is ignored.
    pub fn extension(ext: &str) -> Self {
        Self {
            pattern_type: PatternType::Extension,
            pattern: ext.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    /// Check if a path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        match self.pattern_type {
            PatternType::Exact => path == self.pattern,
            PatternType::Prefix => path.starts_with(&self.pattern),
            PatternType::Within => path_is_within(path, &self.pattern),
            PatternType::Extension => {
                let last = path.rsplit('/').next().unwrap_or(path);
                last.rsplit_once('.')
                    .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(&self.pattern))
            }
        }
    }
}

/// An ordered set of patterns; matches when any member matches.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern.
    pub fn push(&mut self, pattern: PathPattern) {
        self.patterns.push(pattern);
    }

    /// Add a pattern, builder style.
    pub fn with(mut self, pattern: PathPattern) -> Self {
        self.push(pattern);
        self
    }

    /// Build a set of one pattern type from config strings.
    pub fn from_strings<'a>(
        items: impl IntoIterator<Item = &'a String>,
        build: fn(&str) -> PathPattern,
    ) -> Self {
        Self {
            patterns: items.into_iter().map(|s| build(s)).collect(),
        }
    }

    /// Merge another set into this one.
    pub fn extend(&mut self, other: PatternSet) {
        self.patterns.extend(other.patterns);
    }

    /// First matching pattern, if any.
    pub fn find(&self, path: &str) -> Option<&PathPattern> {
        self.patterns.iter().find(|p| p.matches(path))
    }

    /// Check whether any pattern matches.
    pub fn matches(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_pattern_exact() {
        let pattern = PathPattern::exact("/offline.html");
        assert!(pattern.matches("/offline.html"));
        assert!(!pattern.matches("/offline.html/x"));
    }

    #[test]
    fn test_path_pattern_prefix() {
        let pattern = PathPattern::prefix("/_next/image");
        assert!(pattern.matches("/_next/image"));
        assert!(pattern.matches("/_next/imagery"));
        assert!(!pattern.matches("/_next/static/a.js"));
    }

    #[test]
    fn test_path_pattern_within() {
        let pattern = PathPattern::within("/calendar");
        assert!(pattern.matches("/calendar"));
        assert!(pattern.matches("/calendar/2024"));
        assert!(!pattern.matches("/calendars"));
    }

    #[test]
    fn test_path_pattern_extension() {
        let pattern = PathPattern::extension(".PNG");
        assert!(pattern.matches("/icons/icon-192.png"));
        assert!(pattern.matches("/icons/ICON.Png"));
        assert!(!pattern.matches("/png"));
        assert!(!pattern.matches("/images.png/readme"));
        assert!(!pattern.matches("/.png"));
    }

    #[test]
    fn test_pattern_set() {
        let exts = vec!["svg".to_string(), "webp".to_string()];
        let set = PatternSet::from_strings(&exts, PathPattern::extension)
            .with(PathPattern::prefix("/_next/image"));
        assert!(set.matches("/logo.svg"));
        assert!(set.matches("/_next/image?w=64"));
        assert!(!set.matches("/api/tasks"));
        assert_eq!(set.find("/a.webp").map(|p| p.pattern.as_str()), Some("webp"));
        assert!(PatternSet::new().is_empty());
    }
}
