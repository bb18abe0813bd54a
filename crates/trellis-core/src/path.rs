#![forbid(unsafe_code)]

//! Observable property paths.
//!
//! An [`ObservablePath`] is an ordered sequence of property keys identifying a
//! value reachable from a root by repeated property access. List elements are
//! addressed with decimal index segments (`items.0.name`).
//!
//! The canonical key used for de-duplication is the segments joined with `.`.
//! Segments themselves may contain dots when built with
//! [`from_segments`](ObservablePath::from_segments); only
//! [`parse`](ObservablePath::parse) splits on them.

use smallvec::SmallVec;
use std::fmt;

/// An ordered sequence of property keys.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ObservablePath {
    segments: SmallVec<[String; 4]>,
}

impl ObservablePath {
    /// The empty path (refers to the root itself).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path (`"user.address.city"`). Empty segments are skipped.
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        Self {
            segments: dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Build a path from explicit segments without splitting on dots.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Canonical de-duplication key.
    #[must_use]
    pub fn key(&self) -> String {
        self.segments.join(".")
    }

    /// All segments in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// The path without its first `n` segments.
    #[must_use]
    pub fn skip(&self, n: usize) -> Self {
        Self {
            segments: self.segments.iter().skip(n).cloned().collect(),
        }
    }

    /// Append a segment, returning the extended path.
    #[must_use]
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` is a prefix of `other` (or equal to it).
    #[must_use]
    pub fn is_prefix_of(&self, other: &ObservablePath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Debug for ObservablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObservablePath({:?})", self.key())
    }
}

impl fmt::Display for ObservablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<&str> for ObservablePath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl From<String> for ObservablePath {
    fn from(dotted: String) -> Self {
        Self::parse(&dotted)
    }
}

impl From<&ObservablePath> for ObservablePath {
    fn from(path: &ObservablePath) -> Self {
        path.clone()
    }
}

impl<const N: usize> From<[&str; N]> for ObservablePath {
    fn from(segments: [&str; N]) -> Self {
        Self::from_segments(segments)
    }
}

impl From<Vec<&str>> for ObservablePath {
    fn from(segments: Vec<&str>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<Vec<String>> for ObservablePath {
    fn from(segments: Vec<String>) -> Self {
        Self::from_segments(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_dots() {
        let path = ObservablePath::parse("a.b.c");
        assert_eq!(path.segments(), ["a", "b", "c"]);
        assert_eq!(path.key(), "a.b.c");
    }

    #[test]
    fn parse_skips_empty_segments() {
        assert_eq!(ObservablePath::parse("a..b.").segments(), ["a", "b"]);
        assert!(ObservablePath::parse("").is_empty());
    }

    #[test]
    fn array_and_dotted_forms_are_equal() {
        assert_eq!(ObservablePath::from(["x", "y"]), ObservablePath::from("x.y"));
    }

    #[test]
    fn from_segments_keeps_dots() {
        let path = ObservablePath::from_segments(["a.b"]);
        assert_eq!(path.len(), 1);
        assert_eq!(path.first(), Some("a.b"));
    }

    #[test]
    fn skip_and_join() {
        let path = ObservablePath::from("items.0.name");
        assert_eq!(path.skip(1), ObservablePath::from("0.name"));
        assert!(path.skip(5).is_empty());
        assert_eq!(ObservablePath::root().join("v"), ObservablePath::from("v"));
    }

    #[test]
    fn prefix_relation() {
        let a = ObservablePath::from("a");
        let ab = ObservablePath::from("a.b");
        assert!(a.is_prefix_of(&ab));
        assert!(ab.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert!(ObservablePath::root().is_prefix_of(&a));
    }

    #[test]
    fn display_and_debug() {
        let path = ObservablePath::from("a.b");
        assert_eq!(path.to_string(), "a.b");
        assert_eq!(format!("{path:?}"), "ObservablePath(\"a.b\")");
    }
}
