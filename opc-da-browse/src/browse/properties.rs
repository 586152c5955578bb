use crate::connector::ItemPropertySource;
use crate::errors::{OpcResult, format_hresult};
use crate::typedefs::{BrowseElement, ItemProperties, ItemProperty, PropertiesQuery};
use std::rc::Rc;

/// Reads item metadata through `IOPCItemProperties`, one item at a time.
///
/// A failing item yields an empty record carrying the failure text; it never
/// aborts the rest of the batch.
pub struct PropertyFetcher {
    source: Rc<dyn ItemPropertySource>,
}

impl PropertyFetcher {
    pub fn new(source: Rc<dyn ItemPropertySource>) -> Self {
        Self { source }
    }

    /// One record per identifier, in input order.
    pub fn get_properties(&self, item_ids: &[String], query: &PropertiesQuery) -> Vec<ItemProperties> {
        item_ids.iter().map(|id| self.fetch(id, query)).collect()
    }

    /// Fills the `properties` of every element. Elements without an item id
    /// get an empty record without a server round trip.
    pub fn attach(&self, elements: &mut [BrowseElement], query: &PropertiesQuery) {
        for element in elements {
            element.properties = match element.item_id.as_deref() {
                Some(id) => self.fetch(id, query),
                None => ItemProperties::default(),
            };
        }
    }

    pub fn fetch(&self, item_id: &str, query: &PropertiesQuery) -> ItemProperties {
        match self.try_fetch(item_id, query) {
            Ok(props) => props,
            Err(e) => {
                tracing::warn!(item_id, error = %e, "Cannot get properties for item");
                ItemProperties::failed(e.to_string())
            }
        }
    }

    fn try_fetch(&self, item_id: &str, query: &PropertiesQuery) -> OpcResult<ItemProperties> {
        let available = self.source.query_available_properties(item_id)?;
        let mut props = ItemProperties {
            properties: available
                .into_iter()
                .map(|d| ItemProperty::new(d.id, d.description, d.data_type))
                .collect(),
            error: None,
        };
        if !query.all_properties {
            props.retain_ids(&query.property_ids);
        }

        let ids = props.ids();
        if ids.is_empty() {
            return Ok(props);
        }

        if query.return_values {
            let values = self.source.get_item_properties(item_id, &ids)?;
            for (prop, outcome) in props.properties.iter_mut().zip(values) {
                match outcome {
                    Ok(value) => prop.value = Some(value),
                    Err(code) => prop.error = Some(format_hresult(code)),
                }
            }
        }

        // Only some properties are addressable as items; the rest fail individually.
        let lookups = self.source.lookup_item_ids(item_id, &ids)?;
        for (prop, outcome) in props.properties.iter_mut().zip(lookups) {
            if let Ok(id) = outcome {
                prop.item_id = Some(id).filter(|id| !id.is_empty());
            }
        }
        Ok(props)
    }
}
