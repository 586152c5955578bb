use crate::com_worker::{ComRequest, ComWorker};
use crate::connector::ServerConnector;
use crate::errors::OpcResult;
use crate::provider::OpcProvider;
use crate::typedefs::{BrowseElement, BrowseLimits, ElementFilter, ItemProperties, PropertiesQuery};
use async_trait::async_trait;
use std::sync::Arc;

/// Concrete [`OpcProvider`] that serializes every call onto one COM worker
/// thread.
///
/// Generic over the connector so the same plumbing runs against the real
/// COM backend and against in-memory servers.
pub struct OpcDaClient<C: ServerConnector + 'static> {
    pub worker: ComWorker<C>,
}

impl<C: ServerConnector + 'static> OpcDaClient<C> {
    /// Creates a client with default [`BrowseLimits`].
    ///
    /// Blocks until the worker thread is up.
    pub fn new(connector: C) -> OpcResult<Self> {
        Self::with_limits(connector, BrowseLimits::default())
    }

    pub fn with_limits(connector: C, limits: BrowseLimits) -> OpcResult<Self> {
        tracing::info!(?limits, "Initializing OpcDaClient...");
        let worker = ComWorker::start(Arc::new(connector), limits)?;
        tracing::info!("OpcDaClient initialized successfully");
        Ok(Self { worker })
    }
}

#[async_trait]
impl<C: ServerConnector + 'static> OpcProvider for OpcDaClient<C> {
    async fn list_servers(&self, host: &str) -> OpcResult<Vec<String>> {
        let host_owned = host.to_string();
        self.worker
            .send_request(|reply| ComRequest::ListServers {
                host: host_owned,
                reply,
            })
            .await
    }

    async fn list_elements(
        &self,
        server: &str,
        parent: Option<String>,
        filter: ElementFilter,
        query: Option<PropertiesQuery>,
    ) -> OpcResult<Vec<BrowseElement>> {
        let server_owned = server.to_string();
        self.worker
            .send_request(|reply| ComRequest::ListElements {
                server: server_owned,
                parent,
                filter,
                query,
                reply,
            })
            .await
    }

    async fn get_properties(
        &self,
        server: &str,
        item_ids: Vec<String>,
        query: PropertiesQuery,
    ) -> OpcResult<Vec<ItemProperties>> {
        let server_owned = server.to_string();
        self.worker
            .send_request(|reply| ComRequest::GetProperties {
                server: server_owned,
                item_ids,
                query,
                reply,
            })
            .await
    }
}
