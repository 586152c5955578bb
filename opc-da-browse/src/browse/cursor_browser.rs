use crate::browse::enumerator::ElementEnumerator;
use crate::browse::navigator::CursorNavigator;
use crate::browse::path_cache::PathCache;
use crate::browse::properties::PropertyFetcher;
use crate::browse::resolver::IdentifierResolver;
use crate::connector::ConnectedServer;
use crate::errors::{OpcError, OpcResult};
use crate::typedefs::{
    BrowseElement, BrowseLimits, ElementFilter, ItemProperties, PropertiesQuery, ProtocolRevision,
};

/// DA 1.0 / 2.05 browser over `IOPCBrowseServerAddressSpace`.
///
/// Keeps the cursor belief and the path cache of one server binding.
/// DA 1.0 servers have no `IOPCItemProperties`, so listed elements carry
/// empty properties and [`get_properties`](Self::get_properties) is unsupported.
pub struct CursorBrowser {
    revision: ProtocolRevision,
    navigator: Option<CursorNavigator>,
    properties: Option<PropertyFetcher>,
    resolver: IdentifierResolver,
    cache: PathCache,
}

impl CursorBrowser {
    pub fn new(revision: ProtocolRevision, server: &dyn ConnectedServer, limits: BrowseLimits) -> Self {
        debug_assert!(revision != ProtocolRevision::V3);
        let navigator = server
            .address_space()
            .map(|space| CursorNavigator::new(space, limits.max_root_ascent));
        let properties = match revision {
            ProtocolRevision::V1 => None,
            _ => server.item_properties().map(PropertyFetcher::new),
        };
        Self {
            revision,
            navigator,
            properties,
            resolver: IdentifierResolver::new(limits),
            cache: PathCache::new(),
        }
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    /// Another browser moved the shared cursor; trust nothing about it.
    pub fn invalidate(&mut self) {
        if let Some(nav) = self.navigator.as_mut() {
            nav.invalidate();
        }
    }

    pub fn list_elements(
        &mut self,
        parent_item_id: Option<&str>,
        filter: &ElementFilter,
        query: Option<&PropertiesQuery>,
    ) -> OpcResult<Vec<BrowseElement>> {
        let nav = self.navigator.as_mut().ok_or_else(|| {
            OpcError::Unsupported("IOPCBrowseServerAddressSpace not supported".into())
        })?;
        let mut elements = ElementEnumerator {
            nav,
            cache: &mut self.cache,
            resolver: &self.resolver,
        }
        .list(parent_item_id.unwrap_or_default(), filter)?;

        if let Some(query) = query.filter(|_| self.revision != ProtocolRevision::V1) {
            self.property_fetcher()?.attach(&mut elements, query);
        }
        Ok(elements)
    }

    pub fn get_properties(
        &self,
        item_ids: &[String],
        query: &PropertiesQuery,
    ) -> OpcResult<Vec<ItemProperties>> {
        Ok(self.property_fetcher()?.get_properties(item_ids, query))
    }

    fn property_fetcher(&self) -> OpcResult<&PropertyFetcher> {
        self.properties
            .as_ref()
            .ok_or_else(|| OpcError::Unsupported("IOPCItemProperties not supported".into()))
    }
}
