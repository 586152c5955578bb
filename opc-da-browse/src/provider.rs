use crate::errors::OpcResult;
use crate::typedefs::{BrowseElement, ElementFilter, ItemProperties, PropertiesQuery};
use async_trait::async_trait;

#[cfg(feature = "test-support")]
use mockall::automock;

/// Async trait for browsing OPC DA servers.
///
/// This is the stable public API. Backend implementations provide
/// the actual COM/DCOM interaction and serialize every call onto the
/// thread that owns the server connection.
#[cfg_attr(feature = "test-support", automock)]
#[async_trait]
pub trait OpcProvider: Send + Sync {
    /// List available OPC DA servers on the given host.
    ///
    /// # Errors
    /// Returns `Err` if COM initialization fails or the server registry
    /// cannot be enumerated.
    async fn list_servers(&self, host: &str) -> OpcResult<Vec<String>>;

    /// List the children of `parent` (`None` is the root of the address space).
    ///
    /// When `query` is given every element carries its item properties.
    ///
    /// # Errors
    /// Returns `Err` if the server cannot be reached, advertises no supported
    /// DA revision, or every revision failed to list the parent.
    async fn list_elements(
        &self,
        server: &str,
        parent: Option<String>,
        filter: ElementFilter,
        query: Option<PropertiesQuery>,
    ) -> OpcResult<Vec<BrowseElement>>;

    /// Fetch item properties, one record per identifier in input order.
    ///
    /// Items that fail individually yield an empty record with its `error`
    /// set rather than failing the call.
    ///
    /// # Errors
    /// Returns `Err` if the server cannot be reached or no revision offers
    /// a property interface.
    async fn get_properties(
        &self,
        server: &str,
        item_ids: Vec<String>,
        query: PropertiesQuery,
    ) -> OpcResult<Vec<ItemProperties>>;
}
