#![forbid(unsafe_code)]

//! Typed property paths and the event names derived from them.
//!
//! A [`StatePath`] is an ordered list of property-name segments. The empty
//! path is the root of the state tree and addresses the aggregate event.
//! Every other path addresses one property, possibly nested.
//!
//! # Invariants
//!
//! 1. `EventName::for_path(id, p)` is a pure function of `id` and `p`.
//! 2. The root path yields the bare store id; no other path does.
//! 3. `ancestors_deepest_first()` starts with the path itself and ends with
//!    its single-segment prefix. The root is never included.

use std::fmt;

use serde_json::Value;

/// Prefix shared by every synthesized change-registration label.
pub const CHANGE_PREFIX: &str = "onDidChange";

/// Ordered sequence of property-name segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatePath {
    segments: Vec<String>,
}

impl StatePath {
    /// The root path (no segments).
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build a path from segments.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a dot-joined path. Empty input and empty segments are ignored,
    /// so `""` is the root.
    #[must_use]
    pub fn from_dotted(dotted: &str) -> Self {
        Self::new(dotted.split('.').filter(|s| !s.is_empty()))
    }

    /// A new path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// The enclosing path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    /// Last segment, or `None` for the root.
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Every non-root prefix of this path, most specific first.
    ///
    /// `a.b.c` yields `a.b.c`, `a.b`, `a`.
    #[must_use]
    pub fn ancestors_deepest_first(&self) -> Vec<StatePath> {
        (1..=self.segments.len())
            .rev()
            .map(|n| Self {
                segments: self.segments[..n].to_vec(),
            })
            .collect()
    }

    /// Dot-joined form (`""` for the root).
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Deterministic change-registration label: `onDidChange` followed by
    /// every segment with its first character upper-cased.
    ///
    /// `volume` -> `onDidChangeVolume`, `theme.mode` -> `onDidChangeThemeMode`.
    #[must_use]
    pub fn change_label(&self) -> String {
        let mut label = String::from(CHANGE_PREFIX);
        for segment in &self.segments {
            let mut chars = segment.chars();
            if let Some(first) = chars.next() {
                label.extend(first.to_uppercase());
                label.push_str(chars.as_str());
            }
        }
        label
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.dotted())
        }
    }
}

impl From<&str> for StatePath {
    fn from(dotted: &str) -> Self {
        Self::from_dotted(dotted)
    }
}

/// Event-bus key for one store path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName(String);

impl EventName {
    /// Derive the event name for `path` on the store identified by `store_id`.
    #[must_use]
    pub fn for_path(store_id: &str, path: &StatePath) -> Self {
        if path.is_root() {
            Self(store_id.to_string())
        } else {
            Self(format!("{store_id}:{}", path.dotted()))
        }
    }

    /// Aggregate event name for a store.
    #[must_use]
    pub fn root(store_id: &str) -> Self {
        Self(store_id.to_string())
    }

    /// Wrap a raw name, for buses shared with code that does not use paths.
    #[must_use]
    pub fn raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the value at `path` inside `root`. The root path returns `root`.
#[must_use]
pub fn value_at<'a>(root: &'a Value, path: &StatePath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Mutable variant of [`value_at`].
pub fn value_at_mut<'a>(root: &'a mut Value, path: &StatePath) -> Option<&'a mut Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| node.as_object_mut()?.get_mut(segment))
}
