use std::collections::HashMap;
use std::fmt;

/// Simple uppercase mapping: a char whose uppercase form is more than one
/// char (`ß` → `SS`) is left as is.
fn upper(c: char) -> char {
    let mut mapped = c.to_uppercase();
    match (mapped.next(), mapped.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Case-insensitive ordinal comparison of two names, char by char.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars().map(upper).eq(b.chars().map(upper))
}

fn fold(key: &str) -> String {
    key.chars().map(upper).collect()
}

/// Sequence of `DOWN` moves from the address-space root to a node.
///
/// The empty path is the root. Segments are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct BrowsePath(Vec<String>);

impl BrowsePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path, rejecting empty segments.
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self(segments))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Path of a child of this node. `name` must not be empty.
    pub fn child(&self, name: &str) -> Self {
        debug_assert!(!name.is_empty(), "browse path segments are never empty");
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Path of the parent node; the root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Length of the longest case-insensitive common prefix.
    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| eq_ignore_case(a, b))
            .count()
    }

    pub(crate) fn push(&mut self, segment: &str) {
        self.0.push(segment.to_string());
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for BrowsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            write!(f, "/{}", self.0.join("/"))
        }
    }
}

/// A remembered location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPath {
    pub path: BrowsePath,
    pub is_leaf: bool,
}

/// Item id → path and display name → path, filled as browsing proceeds.
///
/// Keys compare case-insensitively. Entries are never invalidated
/// individually; a navigation failure falls back to search or reset.
#[derive(Debug, Default)]
pub struct PathCache {
    by_item_id: HashMap<String, CachedPath>,
    by_name: HashMap<String, CachedPath>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly enumerated child. Later sightings overwrite earlier ones.
    pub fn record(&mut self, item_id: Option<&str>, name: &str, path: &BrowsePath, is_leaf: bool) {
        let entry = CachedPath {
            path: path.clone(),
            is_leaf,
        };
        if let Some(id) = item_id.filter(|id| !id.is_empty()) {
            self.by_item_id.insert(fold(id), entry.clone());
        }
        self.by_name.insert(fold(name), entry);
    }

    pub fn by_item_id(&self, item_id: &str) -> Option<&CachedPath> {
        self.by_item_id.get(&fold(item_id))
    }

    pub fn by_name(&self, name: &str) -> Option<&CachedPath> {
        self.by_name.get(&fold(name))
    }

    /// Identifier match first, then display-name match.
    pub fn lookup(&self, key: &str) -> Option<&CachedPath> {
        self.by_item_id(key).or_else(|| self.by_name(key))
    }

    pub fn len(&self) -> usize {
        self.by_item_id.len() + self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item_id.is_empty() && self.by_name.is_empty()
    }

    /// Forgets everything. Used when the bound server changes.
    pub fn clear(&mut self) {
        self.by_item_id.clear();
        self.by_name.clear();
    }
}
