use crate::browse::navigator::CursorNavigator;
use crate::browse::path_cache::{BrowsePath, PathCache};
use crate::browse::resolver::IdentifierResolver;
use crate::connector::AddressSpace;
use crate::errors::OpcResult;
use crate::typedefs::{BrowseElement, BrowseFilter, BrowseType, ElementFilter, NamespaceType};
use std::rc::Rc;

/// Lists the children of one position in a cursor-based address space.
pub struct ElementEnumerator<'a> {
    pub nav: &'a mut CursorNavigator,
    pub cache: &'a mut PathCache,
    pub resolver: &'a IdentifierResolver,
}

impl ElementEnumerator<'_> {
    /// Children of `parent_item_id` (`""` is the root) matching `filter`.
    ///
    /// A leaf parent has no children and yields an empty list.
    pub fn list(
        &mut self,
        parent_item_id: &str,
        filter: &ElementFilter,
    ) -> OpcResult<Vec<BrowseElement>> {
        let space = Rc::clone(self.nav.space());
        match space.organization()? {
            NamespaceType::Flat => self.list_flat(space.as_ref(), filter),
            NamespaceType::Hierarchical => {
                self.list_hierarchical(space.as_ref(), parent_item_id, filter)
            }
        }
    }

    fn list_hierarchical(
        &mut self,
        space: &dyn AddressSpace,
        parent_item_id: &str,
        filter: &ElementFilter,
    ) -> OpcResult<Vec<BrowseElement>> {
        let resolution = self
            .resolver
            .position_at(self.nav, self.cache, parent_item_id)?;
        let state = self.nav.state();
        if state.target_is_leaf {
            tracing::debug!(parent_item_id, ?resolution, "Target is a leaf, no children");
            return Ok(Vec::new());
        }
        // After a BROWSE_TO by identifier the path is unknown; nothing can be remembered.
        let parent_path = state.synced.then(|| state.path.clone());

        let mut elements = Vec::new();
        if filter.element_kind != BrowseFilter::Items {
            for name in Self::names(space, BrowseType::Branch, filter)? {
                let item_id = resolve_item_id(space, &name)?;
                self.remember(parent_path.as_ref(), item_id.as_deref(), &name, false);
                elements.push(BrowseElement::branch(name, item_id));
            }
        }
        if filter.element_kind != BrowseFilter::Branches {
            for name in Self::names(space, BrowseType::Leaf, filter)? {
                let item_id = resolve_item_id(space, &name)?;
                self.remember(parent_path.as_ref(), item_id.as_deref(), &name, true);
                elements.push(BrowseElement::leaf(name, item_id));
            }
        }

        tracing::debug!(parent_item_id, ?resolution, count = elements.len(), "Listed children");
        Ok(elements)
    }

    fn list_flat(
        &mut self,
        space: &dyn AddressSpace,
        filter: &ElementFilter,
    ) -> OpcResult<Vec<BrowseElement>> {
        if filter.element_kind == BrowseFilter::Branches {
            return Ok(Vec::new());
        }
        let root = BrowsePath::root();
        let mut elements = Vec::new();
        for name in Self::names(space, BrowseType::Flat, filter)? {
            let item_id = resolve_item_id(space, &name)?;
            self.remember(Some(&root), item_id.as_deref(), &name, true);
            elements.push(BrowseElement::leaf(name, item_id));
        }
        Ok(elements)
    }

    fn names(
        space: &dyn AddressSpace,
        browse_type: BrowseType,
        filter: &ElementFilter,
    ) -> OpcResult<Vec<String>> {
        space.browse_names(
            browse_type,
            &filter.name,
            filter.data_type,
            filter.access_rights.bits(),
        )
    }

    fn remember(
        &mut self,
        parent: Option<&BrowsePath>,
        item_id: Option<&str>,
        name: &str,
        is_leaf: bool,
    ) {
        if name.is_empty() {
            return;
        }
        if let Some(parent) = parent {
            self.cache.record(item_id, name, &parent.child(name), is_leaf);
        }
    }
}

/// `GetItemID` for a child, `None` when the server declines.
fn resolve_item_id(space: &dyn AddressSpace, name: &str) -> OpcResult<Option<String>> {
    match space.item_id(name) {
        Ok(id) if id.is_empty() => Ok(None),
        Ok(id) => Ok(Some(id)),
        Err(e) if e.is_transport() => Err(e),
        Err(e) => {
            tracing::trace!(name, error = %e, "GetItemID declined");
            Ok(None)
        }
    }
}
