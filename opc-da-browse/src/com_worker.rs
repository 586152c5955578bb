use crate::browse::AutoBrowser;
use crate::connector::{ConnectedServer, ServerConnector};
use crate::errors::{OpcError, OpcResult};
use crate::typedefs::{
    BrowseElement, BrowseLimits, ElementFilter, ItemProperties, PropertiesQuery,
};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub enum ComRequest {
    ListServers {
        host: String,
        reply: oneshot::Sender<OpcResult<Vec<String>>>,
    },
    ListElements {
        server: String,
        parent: Option<String>,
        filter: ElementFilter,
        query: Option<PropertiesQuery>,
        reply: oneshot::Sender<OpcResult<Vec<BrowseElement>>>,
    },
    GetProperties {
        server: String,
        item_ids: Vec<String>,
        query: PropertiesQuery,
        reply: oneshot::Sender<OpcResult<Vec<ItemProperties>>>,
    },
}

/// A connection together with the browser bound to it. The browser's
/// cursor belief and path cache are only valid for this connection.
struct Session<S> {
    browser: AutoBrowser,
    server: S,
}

impl<S: ConnectedServer> Session<S> {
    fn open<C>(connector: &C, server_name: &str, limits: BrowseLimits) -> OpcResult<Self>
    where
        C: ServerConnector<Server = S>,
    {
        let server = connector.connect(server_name)?;
        let browser = AutoBrowser::new(&server, limits)?;
        tracing::debug!(
            server = %server_name,
            capabilities = ?browser.capabilities(),
            "Session opened"
        );
        Ok(Self { browser, server })
    }
}

/// Owns every server connection on one dedicated thread.
///
/// Requests are queued and handled one at a time, so cursor-moving calls
/// against the same server never interleave.
pub struct ComWorker<C: ServerConnector + 'static> {
    pub sender: mpsc::Sender<ComRequest>,
    pub handle: Option<std::thread::JoinHandle<()>>,
    _phantom: std::marker::PhantomData<C>,
}

/// `true` when the failure points at a dead connection rather than a
/// rejected request.
fn is_connection_error(err: &OpcError) -> bool {
    match err {
        OpcError::Aggregate(failures) => failures.iter().any(|f| f.error.is_transport()),
        other => other.is_transport(),
    }
}

impl<C: ServerConnector + 'static> ComWorker<C> {
    /// Spawns the worker thread and waits until it has initialized COM.
    ///
    /// Blocks the calling thread; call it from `spawn_blocking` inside a
    /// runtime.
    pub fn start(connector: Arc<C>, limits: BrowseLimits) -> OpcResult<Self> {
        let (tx, mut rx) = mpsc::channel(32);
        let (init_tx, init_rx) = oneshot::channel::<OpcResult<()>>();

        let handle = std::thread::Builder::new()
            .name("opc-com-worker".into())
            .spawn(move || {
                #[cfg(windows)]
                let _guard = match crate::com_guard::ComGuard::new() {
                    Ok(g) => g,
                    Err(e) => {
                        tracing::error!(error = ?e, "COM worker failed to initialize MTA");
                        let _ = init_tx
                            .send(Err(OpcError::Internal("COM init failed on worker".into())));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));

                let mut sessions: HashMap<String, Session<C::Server>> = HashMap::new();

                while let Some(req) = rx.blocking_recv() {
                    match req {
                        ComRequest::ListServers { host, reply } => {
                            let span = tracing::info_span!("opc.list_servers", host = %host);
                            let _enter = span.enter();
                            let servers = connector.enumerate_servers(&host);
                            if let Ok(s) = &servers {
                                tracing::info!(count = s.len(), "list_servers completed");
                            }
                            let _ = reply.send(servers);
                        }
                        ComRequest::ListElements {
                            server,
                            parent,
                            filter,
                            query,
                            reply,
                        } => {
                            let span = tracing::info_span!(
                                "opc.list_elements",
                                server = %server,
                                parent = parent.as_deref().unwrap_or_default()
                            );
                            let _enter = span.enter();
                            let result = Self::dispatch_with_retry(
                                &mut sessions,
                                &connector,
                                &server,
                                limits,
                                |browser| browser.list_elements(parent.as_deref(), &filter, query.as_ref()),
                            );
                            if let Ok(elements) = &result {
                                tracing::info!(count = elements.len(), "list_elements completed");
                            }
                            let _ = reply.send(result);
                        }
                        ComRequest::GetProperties {
                            server,
                            item_ids,
                            query,
                            reply,
                        } => {
                            let span = tracing::info_span!(
                                "opc.get_properties",
                                server = %server,
                                item_count = item_ids.len()
                            );
                            let _enter = span.enter();
                            let result = Self::dispatch_with_retry(
                                &mut sessions,
                                &connector,
                                &server,
                                limits,
                                |browser| browser.get_properties(&item_ids, &query),
                            );
                            if let Ok(props) = &result {
                                let failed = props.iter().filter(|p| p.error.is_some()).count();
                                tracing::info!(count = props.len(), failed, "get_properties completed");
                            }
                            let _ = reply.send(result);
                        }
                    }
                }

                tracing::debug!("COM worker thread exiting cleanly");
            })
            .map_err(|e| OpcError::Internal(format!("Cannot spawn COM worker thread: {e}")))?;

        init_rx
            .blocking_recv()
            .map_err(|_| OpcError::Internal("COM worker thread panicked during init".into()))??;

        tracing::debug!("COM worker thread started");

        Ok(Self {
            sender: tx,
            handle: Some(handle),
            _phantom: std::marker::PhantomData,
        })
    }

    pub async fn send_request<F, R>(&self, req_builder: F) -> OpcResult<R>
    where
        F: FnOnce(oneshot::Sender<OpcResult<R>>) -> ComRequest,
    {
        if self
            .handle
            .as_ref()
            .is_some_and(std::thread::JoinHandle::is_finished)
        {
            tracing::error!("COM worker thread panicked or exited unexpectedly");
            return Err(OpcError::Internal("COM worker thread panicked".into()));
        }

        let (tx, rx) = oneshot::channel();
        let req = req_builder(tx);

        self.sender
            .send(req)
            .await
            .map_err(|_| OpcError::Internal("COM worker channel closed (worker stopped)".into()))?;

        rx.await
            .map_err(|_| OpcError::Internal("COM worker shut down during request".into()))?
    }

    /// Runs `operation` on the session for `server_name`, connecting on
    /// first use. A dead connection is evicted and the operation retried
    /// once on a fresh session.
    fn dispatch_with_retry<F, R>(
        sessions: &mut HashMap<String, Session<C::Server>>,
        connector: &C,
        server_name: &str,
        limits: BrowseLimits,
        mut operation: F,
    ) -> OpcResult<R>
    where
        F: FnMut(&mut AutoBrowser) -> OpcResult<R>,
    {
        if sessions
            .get(server_name)
            .is_some_and(|s| !s.server.is_connected())
        {
            tracing::warn!(server = %server_name, "Cached connection is gone, evicting");
            sessions.remove(server_name);
        }

        let session = match sessions.entry(server_name.to_string()) {
            Entry::Occupied(entry) => {
                tracing::trace!(server = %server_name, "Cache hit");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                tracing::debug!(server = %server_name, "Cache miss, connecting");
                entry.insert(Session::open(connector, server_name, limits)?)
            }
        };

        match operation(&mut session.browser) {
            Err(e) if is_connection_error(&e) => {
                tracing::warn!(server = %server_name, error = %e, "Evicting stale connection");
                sessions.remove(server_name);
                tracing::debug!(server = %server_name, "Reconnecting");
                let mut fresh = Session::open(connector, server_name, limits).map_err(|connect_e| {
                    tracing::error!(error = %connect_e, "Reconnect failed");
                    connect_e
                })?;
                let result = operation(&mut fresh.browser);
                sessions.insert(server_name.to_string(), fresh);
                result
            }
            other => other,
        }
    }
}
