use crate::browse::navigator::CursorNavigator;
use crate::browse::path_cache::{BrowsePath, CachedPath, PathCache, eq_ignore_case};
use crate::connector::AddressSpace;
use crate::errors::{OpcError, OpcResult};
use crate::typedefs::{BrowseLimits, BrowseType};
use std::rc::Rc;

/// How [`IdentifierResolver::position_at`] placed the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Empty identifier.
    Root,
    /// Path remembered from an earlier enumeration.
    Cached,
    /// Path found by walking the address space.
    Searched,
    /// `BROWSE_TO` with the name derived from a bracketed identifier.
    Heuristic(String),
    /// `BROWSE_TO` with the identifier as given.
    Direct,
}

/// Returns the part after the last `]`, or the identifier itself.
///
/// ```
/// use opc_da_browse::browse::extract_browse_name;
/// assert_eq!(extract_browse_name("[Channel1]Device1.Tag1"), "Device1.Tag1");
/// assert_eq!(extract_browse_name("Device1.Tag1"), "Device1.Tag1");
/// assert_eq!(extract_browse_name("[Channel1]"), "[Channel1]");
/// ```
pub fn extract_browse_name(item_id: &str) -> &str {
    match item_id.rfind(']') {
        Some(idx) if idx + 1 < item_id.len() => &item_id[idx + 1..],
        _ => item_id,
    }
}

/// Turns an opaque item identifier into a cursor position.
///
/// Strategies are tried in order: cache, bounded search, bracket heuristic,
/// raw `BROWSE_TO`. The first that lands the cursor wins.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    limits: BrowseLimits,
}

impl IdentifierResolver {
    pub fn new(limits: BrowseLimits) -> Self {
        Self { limits }
    }

    /// Positions the cursor on `item_id`, or on its parent when it is a leaf.
    ///
    /// After return, `nav.state().target_is_leaf` tells which.
    pub fn position_at(
        &self,
        nav: &mut CursorNavigator,
        cache: &mut PathCache,
        item_id: &str,
    ) -> OpcResult<Resolution> {
        nav.set_leaf_target(false);
        if item_id.is_empty() {
            nav.move_to(&BrowsePath::root())?;
            return Ok(Resolution::Root);
        }

        if let Some(hit) = cache.lookup(item_id).cloned() {
            match Self::move_to_cached(nav, &hit) {
                Ok(()) => return Ok(Resolution::Cached),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        item_id,
                        path = %hit.path,
                        error = %e,
                        "Cached path no longer reachable, searching"
                    );
                }
            }
        }

        if self.search(nav, cache, item_id)?.is_some() {
            return Ok(Resolution::Searched);
        }

        let derived = extract_browse_name(item_id);
        if derived != item_id {
            match nav.browse_to(derived) {
                Ok(()) => return Ok(Resolution::Heuristic(derived.to_string())),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    tracing::debug!(item_id, derived, error = %e, "Derived browse name rejected");
                }
            }
        }

        match nav.browse_to(item_id) {
            Ok(()) => Ok(Resolution::Direct),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                tracing::debug!(item_id, error = %e, "BROWSE_TO rejected identifier");
                Err(OpcError::NotFound(item_id.to_string()))
            }
        }
    }

    fn move_to_cached(nav: &mut CursorNavigator, hit: &CachedPath) -> OpcResult<()> {
        if hit.is_leaf {
            nav.move_to(&hit.path.parent())?;
            nav.set_leaf_target(true);
        } else {
            nav.move_to(&hit.path)?;
        }
        Ok(())
    }

    /// Depth-first search of the address space for a node whose item id
    /// equals `item_id` (case-insensitively).
    ///
    /// Bounded by `max_search_depth` and `max_search_nodes`; hitting either
    /// bound is a miss, not an error. On a miss the cursor is returned to the
    /// root. A hit is remembered in `cache`.
    pub fn search(
        &self,
        nav: &mut CursorNavigator,
        cache: &mut PathCache,
        item_id: &str,
    ) -> OpcResult<Option<CachedPath>> {
        if item_id.trim().is_empty() {
            return Ok(None);
        }
        nav.move_to_root()?;

        let mut search = Search {
            target: item_id,
            limits: &self.limits,
            visited: 0,
            capped: false,
        };
        match search.descend(nav, 0) {
            Ok(Some(found)) => {
                if let Some(name) = found.path.last() {
                    cache.record(Some(item_id), name, &found.path, found.is_leaf);
                }
                nav.set_leaf_target(found.is_leaf);
                tracing::debug!(item_id, path = %found.path, visited = search.visited, "Search hit");
                return Ok(Some(found));
            }
            Ok(None) => {
                tracing::debug!(
                    item_id,
                    visited = search.visited,
                    capped = search.capped,
                    "Search miss"
                );
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                tracing::warn!(item_id, error = %e, "Search aborted by server fault");
            }
        }

        nav.move_to_root()?;
        Ok(None)
    }
}

struct Search<'a> {
    target: &'a str,
    limits: &'a BrowseLimits,
    visited: usize,
    capped: bool,
}

impl Search<'_> {
    fn descend(&mut self, nav: &mut CursorNavigator, depth: usize) -> OpcResult<Option<CachedPath>> {
        if self.visited >= self.limits.max_search_nodes {
            self.capped = true;
            return Ok(None);
        }
        if depth > self.limits.max_search_depth {
            return Ok(None);
        }

        let space = Rc::clone(nav.space());
        let branches = space.browse_names(BrowseType::Branch, "", 0, 0)?;
        for branch in branches {
            if self.visited >= self.limits.max_search_nodes {
                self.capped = true;
                return Ok(None);
            }
            self.visited += 1;
            if self.matches(space.as_ref(), &branch)? {
                nav.move_down(&branch)?;
                return Ok(Some(CachedPath {
                    path: nav.state().path.clone(),
                    is_leaf: false,
                }));
            }

            nav.move_down(&branch)?;
            if let Some(found) = self.descend(nav, depth + 1)? {
                return Ok(Some(found));
            }
            if self.capped {
                return Ok(None);
            }
            nav.move_up()?;
        }

        let leaves = space.browse_names(BrowseType::Leaf, "", 0, 0)?;
        for leaf in leaves {
            if self.visited >= self.limits.max_search_nodes {
                self.capped = true;
                return Ok(None);
            }
            self.visited += 1;
            if self.matches(space.as_ref(), &leaf)? {
                return Ok(Some(CachedPath {
                    path: nav.state().path.child(&leaf),
                    is_leaf: true,
                }));
            }
        }
        Ok(None)
    }

    fn matches(&self, space: &dyn AddressSpace, name: &str) -> OpcResult<bool> {
        match space.item_id(name) {
            Ok(id) => Ok(!id.is_empty() && eq_ignore_case(&id, self.target)),
            Err(e) if e.is_transport() => Err(e),
            Err(_) => Ok(false),
        }
    }
}
