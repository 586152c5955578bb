use crate::connector::{
    BrowseRequest, ConnectedServer, RemoteElement, RemoteItemProperties, ServerBrowse,
};
use crate::errors::{OpcError, OpcResult, format_hresult};
use crate::typedefs::{
    BrowseElement, BrowseLimits, ElementFilter, ItemProperties, ItemProperty, PropertiesQuery,
};
use std::collections::HashSet;
use std::rc::Rc;

/// DA 3.0 browser over `IOPCBrowse`.
///
/// The interface is addressed by item id and keeps no cursor, so this
/// browser holds no navigation state. Data type and access rights filters
/// have no DA 3.0 equivalent and are ignored; the vendor filter is passed
/// through.
pub struct ItemBrowser {
    browse: Option<Rc<dyn ServerBrowse>>,
    max_elements_per_page: u32,
}

impl ItemBrowser {
    pub fn new(server: &dyn ConnectedServer, limits: BrowseLimits) -> Self {
        Self {
            browse: server.browse(),
            max_elements_per_page: limits.max_elements_per_page,
        }
    }

    fn interface(&self) -> OpcResult<&Rc<dyn ServerBrowse>> {
        self.browse
            .as_ref()
            .ok_or_else(|| OpcError::Unsupported("IOPCBrowse not supported".into()))
    }

    /// Follows continuation points until the server reports the listing
    /// complete. A point the server already handed out ends the listing.
    pub fn list_elements(
        &self,
        parent_item_id: Option<&str>,
        filter: &ElementFilter,
        query: Option<&PropertiesQuery>,
    ) -> OpcResult<Vec<BrowseElement>> {
        let browse = self.interface()?;
        let parent = parent_item_id.unwrap_or_default();
        let (return_all, return_values, property_ids) = match query {
            Some(q) => (q.all_properties, q.return_values, q.property_ids.as_slice()),
            None => (false, false, &[][..]),
        };

        let mut elements = Vec::new();
        let mut continuation: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages = 0_usize;
        loop {
            let page = browse.browse(&BrowseRequest {
                item_id: parent,
                continuation_point: continuation.as_deref(),
                max_elements: self.max_elements_per_page,
                filter: filter.element_kind,
                name_filter: &filter.name,
                vendor_filter: filter.vendor_filter.as_deref().unwrap_or_default(),
                return_all_properties: return_all,
                return_property_values: return_values,
                property_ids,
            })?;
            pages += 1;
            elements.extend(
                page.elements
                    .into_iter()
                    .map(|remote| to_element(remote, query.is_some())),
            );

            match page.continuation_point.filter(|cp| !cp.is_empty()) {
                Some(next) if !seen.insert(next.clone()) => {
                    tracing::warn!(parent, continuation = %next, pages, "Server repeated continuation point, stopping");
                    break;
                }
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        tracing::debug!(parent, pages, count = elements.len(), "Listed children");
        Ok(elements)
    }

    /// One record per identifier, in input order. Items the server rejects
    /// get an empty record.
    pub fn get_properties(
        &self,
        item_ids: &[String],
        query: &PropertiesQuery,
    ) -> OpcResult<Vec<ItemProperties>> {
        let browse = self.interface()?;
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        // An empty id list asks for every property.
        let requested: &[u32] = if query.all_properties {
            &[]
        } else {
            &query.property_ids
        };
        let results = browse.get_properties(item_ids, query.return_values, requested)?;
        if results.len() != item_ids.len() {
            return Err(OpcError::Internal(format!(
                "GetProperties returned {} results for {} items",
                results.len(),
                item_ids.len()
            )));
        }

        Ok(item_ids
            .iter()
            .zip(results)
            .map(|(item_id, remote)| {
                let mut props = to_properties(remote);
                if let Some(reason) = props.error.as_deref() {
                    tracing::warn!(item_id = %item_id, error = reason, "Cannot get properties for item");
                }
                if !query.all_properties {
                    props.retain_ids(&query.property_ids);
                }
                props
            })
            .collect())
    }
}

fn to_element(remote: RemoteElement, with_properties: bool) -> BrowseElement {
    let mut element = if remote.has_children {
        BrowseElement::branch(remote.name, remote.item_id.filter(|id| !id.is_empty()))
    } else {
        BrowseElement::leaf(remote.name, remote.item_id.filter(|id| !id.is_empty()))
    };
    if with_properties {
        element.properties = to_properties(remote.properties);
    }
    element
}

fn to_properties(remote: RemoteItemProperties) -> ItemProperties {
    match remote {
        Ok(list) => ItemProperties {
            properties: list
                .into_iter()
                .map(|p| ItemProperty {
                    value: p.value,
                    item_id: p.item_id.filter(|id| !id.is_empty()),
                    error: p.error.map(format_hresult),
                    ..ItemProperty::new(p.id, p.description, p.data_type)
                })
                .collect(),
            error: None,
        },
        Err(code) => ItemProperties::failed(format_hresult(code)),
    }
}
