//! Narrow interfaces to the remote OPC server.
//!
//! The browsing core only ever talks to these traits. The Windows backend
//! implements them over COM; tests implement them over an in-memory tree.

use crate::errors::OpcResult;
use crate::typedefs::{BrowseFilter, BrowseType, NamespaceType, OpcValue, ServerCapabilities};
use std::rc::Rc;

/// Relative or absolute move of the server-side browse cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseDirection<'a> {
    /// One level towards the root (`OPC_BROWSE_UP`).
    Up,
    /// Into the named child branch (`OPC_BROWSE_DOWN`).
    Down(&'a str),
    /// Straight to a fully qualified branch id (`OPC_BROWSE_TO`). `""` is the root.
    To(&'a str),
}

/// `IOPCBrowseServerAddressSpace`: the cursor-based DA 1.0/2.05 browse interface.
///
/// Every call blocks until the server answers or faults.
pub trait AddressSpace {
    fn organization(&self) -> OpcResult<NamespaceType>;

    fn change_position(&self, direction: BrowseDirection<'_>) -> OpcResult<()>;

    /// Names of the children of the current position.
    fn browse_names(
        &self,
        browse_type: BrowseType,
        name_filter: &str,
        data_type: u16,
        access_rights: u32,
    ) -> OpcResult<Vec<String>>;

    /// Fully qualified item id of a child of the current position.
    fn item_id(&self, name: &str) -> OpcResult<String>;
}

/// Description of an available property, from `QueryAvailableProperties`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub id: u32,
    pub description: String,
    pub data_type: u16,
}

/// Per-property outcome of a batched property call. `Err` holds the HRESULT.
pub type PropertyOutcome<T> = Result<T, u32>;

/// `IOPCItemProperties` (DA 2.05).
pub trait ItemPropertySource {
    fn query_available_properties(&self, item_id: &str) -> OpcResult<Vec<PropertyDescriptor>>;

    /// One outcome per requested id, same order.
    fn get_item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcResult<Vec<PropertyOutcome<OpcValue>>>;

    /// One outcome per requested id, same order.
    fn lookup_item_ids(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcResult<Vec<PropertyOutcome<String>>>;
}

/// A property as reported by DA 3.0 `IOPCBrowse`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProperty {
    pub id: u32,
    pub description: String,
    pub data_type: u16,
    pub item_id: Option<String>,
    pub value: Option<OpcValue>,
    /// HRESULT of a failed property.
    pub error: Option<u32>,
}

/// Properties of one item as reported by DA 3.0. `Err` holds the item's HRESULT.
pub type RemoteItemProperties = Result<Vec<RemoteProperty>, u32>;

/// Element returned by DA 3.0 `IOPCBrowse::Browse`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteElement {
    pub name: String,
    pub item_id: Option<String>,
    pub has_children: bool,
    pub is_item: bool,
    pub properties: RemoteItemProperties,
}

/// One page of a DA 3.0 browse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowsePage {
    pub elements: Vec<RemoteElement>,
    /// Opaque token to fetch the next page; `None` when the listing is complete.
    pub continuation_point: Option<String>,
    pub more_elements: bool,
}

/// Arguments of a DA 3.0 browse call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest<'a> {
    pub item_id: &'a str,
    pub continuation_point: Option<&'a str>,
    pub max_elements: u32,
    pub filter: BrowseFilter,
    pub name_filter: &'a str,
    pub vendor_filter: &'a str,
    pub return_all_properties: bool,
    pub return_property_values: bool,
    pub property_ids: &'a [u32],
}

/// `IOPCBrowse` (DA 3.0): stateless, item-id addressed browsing.
pub trait ServerBrowse {
    fn browse(&self, request: &BrowseRequest<'_>) -> OpcResult<BrowsePage>;

    /// One entry per requested item, same order. Empty `property_ids` means all.
    fn get_properties(
        &self,
        item_ids: &[String],
        return_property_values: bool,
        property_ids: &[u32],
    ) -> OpcResult<Vec<RemoteItemProperties>>;
}

/// A live server binding, as far as browsing is concerned.
///
/// Interfaces the server does not implement are `None`.
pub trait ConnectedServer {
    fn is_connected(&self) -> bool;

    /// Protocol revisions the server advertises through its categories.
    fn capabilities(&self) -> OpcResult<ServerCapabilities>;

    fn address_space(&self) -> Option<Rc<dyn AddressSpace>>;

    fn item_properties(&self) -> Option<Rc<dyn ItemPropertySource>>;

    fn browse(&self) -> Option<Rc<dyn ServerBrowse>>;
}

/// Factory for server bindings. Lives on the caller's side of the worker thread.
pub trait ServerConnector: Send + Sync {
    type Server: ConnectedServer;

    fn enumerate_servers(&self, host: &str) -> OpcResult<Vec<String>>;

    fn connect(&self, server_name: &str) -> OpcResult<Self::Server>;
}
