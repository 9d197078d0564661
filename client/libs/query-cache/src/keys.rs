//! Structured cache keys
//!
//! A key is an ordered list of segments, e.g. `["videos", "mostLiked"]` or
//! `["messages", <user id>]`. Keys that share a prefix are related: invalidating
//! `["videos"]` touches every key that starts with it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of a [`CacheKey`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    Str(String),
    Num(u64),
    Bool(bool),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Str(s) => write!(f, "{}", s),
            KeySegment::Num(n) => write!(f, "{}", n),
            KeySegment::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(s: &str) -> Self {
        KeySegment::Str(s.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(s: String) -> Self {
        KeySegment::Str(s)
    }
}

impl From<u64> for KeySegment {
    fn from(n: u64) -> Self {
        KeySegment::Num(n)
    }
}

impl From<bool> for KeySegment {
    fn from(b: bool) -> Self {
        KeySegment::Bool(b)
    }
}

/// Identifies one logical query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<KeySegment>);

impl CacheKey {
    /// Single-segment key
    pub fn root(segment: impl Into<KeySegment>) -> Self {
        Self(vec![segment.into()])
    }

    pub fn from_segments(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }

    /// Append a segment
    pub fn push(mut self, segment: impl Into<KeySegment>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` is a (non-strict) prefix of this key
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// First segment, used as the metrics label
    pub fn entity(&self) -> &str {
        match self.0.first() {
            Some(KeySegment::Str(s)) => s.as_str(),
            _ => "unknown",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Selects cache entries for optimistic updates and invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySelector {
    Exact(CacheKey),
    Prefix(CacheKey),
}

impl KeySelector {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeySelector::Exact(k) => k == key,
            KeySelector::Prefix(p) => key.starts_with(p),
        }
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Exact(k) => write!(f, "{}", k),
            KeySelector::Prefix(p) => write!(f, "{}/*", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = CacheKey::root("videos").push("mostLiked");
        assert_eq!(key.to_string(), "videos/mostLiked");

        let key = CacheKey::root("video").push(42u64);
        assert_eq!(key.to_string(), "video/42");
    }

    #[test]
    fn test_prefix_matching() {
        let videos = CacheKey::root("videos");
        let most_liked = CacheKey::root("videos").push("mostLiked");
        let video = CacheKey::root("video").push(1u64);

        assert!(most_liked.starts_with(&videos));
        assert!(videos.starts_with(&videos));
        assert!(!video.starts_with(&videos));
        assert!(!videos.starts_with(&most_liked));
    }

    #[test]
    fn test_segment_types_do_not_collide() {
        let by_num = CacheKey::root("video").push(7u64);
        let by_str = CacheKey::root("video").push("7");
        assert_ne!(by_num, by_str);
    }

    #[test]
    fn test_selector() {
        let selector = KeySelector::Prefix(CacheKey::root("userVideos"));
        assert!(selector.matches(&CacheKey::root("userVideos").push("alice")));
        assert!(!selector.matches(&CacheKey::root("videos").push("mostLiked")));

        let exact = KeySelector::Exact(CacheKey::root("friends"));
        assert!(exact.matches(&CacheKey::root("friends")));
        assert!(!exact.matches(&CacheKey::root("friends").push("x")));
    }

    #[test]
    fn test_entity() {
        assert_eq!(CacheKey::root("messages").push("bob").entity(), "messages");
        assert_eq!(CacheKey::root(3u64).entity(), "unknown");
    }
}
