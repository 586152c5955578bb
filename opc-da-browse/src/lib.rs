//! # opc-da-browse
//!
//! Address-space browsing for OPC DA servers across protocol revisions.
//!
//! DA 1.0 and 2.05 servers expose a stateful browse cursor; DA 3.0 servers
//! browse by item id. [`AutoBrowser`] hides the difference: it lists the
//! children of any item id and fetches item properties, trying the newest
//! revision the server advertises first and falling back on failure.
//!
//! [`OpcDaClient`] runs one [`AutoBrowser`] per server on a dedicated COM
//! thread and exposes it through the async [`OpcProvider`] trait.
//!
//! ## Features
//! - `opc-da-backend` (default): COM connector over the `opc_da` crate (Windows only)
//! - `test-support`: Enables `MockOpcProvider` via `mockall`

mod backend;
pub mod browse;
#[cfg(windows)]
mod com_guard;
mod com_worker;
mod connector;
mod errors;
mod provider;
mod typedefs;

// Stable public API
pub use browse::AutoBrowser;
pub use connector::{
    AddressSpace, BrowseDirection, BrowsePage, BrowseRequest, ConnectedServer,
    ItemPropertySource, PropertyDescriptor, PropertyOutcome, RemoteElement, RemoteItemProperties,
    RemoteProperty, ServerBrowse, ServerConnector,
};
pub use errors::{
    OpcError, OpcResult, RevisionFailure, format_hresult, friendly_com_hint,
    friendly_hresult_hint,
};
pub use provider::OpcProvider;
pub use typedefs::{
    AccessRights, BrowseElement, BrowseFilter, BrowseLimits, BrowseType, ElementFilter,
    ElementKind, ItemProperties, ItemProperty, NamespaceType, OpcValue, PropertiesQuery,
    ProtocolRevision, ServerCapabilities, property_ids,
};

pub use backend::client::OpcDaClient;

#[cfg(windows)]
pub use com_guard::ComGuard;

// Backend re-exports (conditional)
#[cfg(all(windows, feature = "opc-da-backend"))]
pub use backend::com::{ComConnector, ComServer};

// Test support re-export
#[cfg(feature = "test-support")]
pub use provider::MockOpcProvider;
