use crate::browse::cursor_browser::CursorBrowser;
use crate::browse::item_browser::ItemBrowser;
use crate::connector::ConnectedServer;
use crate::errors::{OpcError, OpcResult, RevisionFailure};
use crate::typedefs::{
    BrowseElement, BrowseLimits, ElementFilter, ItemProperties, PropertiesQuery, ProtocolRevision,
    ServerCapabilities,
};

/// A browser bound to one protocol revision.
pub enum RevisionBrowser {
    V1(CursorBrowser),
    V2(CursorBrowser),
    V3(ItemBrowser),
}

impl RevisionBrowser {
    pub fn bind(revision: ProtocolRevision, server: &dyn ConnectedServer, limits: BrowseLimits) -> Self {
        match revision {
            ProtocolRevision::V1 => Self::V1(CursorBrowser::new(revision, server, limits)),
            ProtocolRevision::V2 => Self::V2(CursorBrowser::new(revision, server, limits)),
            ProtocolRevision::V3 => Self::V3(ItemBrowser::new(server, limits)),
        }
    }

    pub const fn revision(&self) -> ProtocolRevision {
        match self {
            Self::V1(_) => ProtocolRevision::V1,
            Self::V2(_) => ProtocolRevision::V2,
            Self::V3(_) => ProtocolRevision::V3,
        }
    }

    /// `true` for browsers that move the server-side cursor.
    pub const fn uses_cursor(&self) -> bool {
        !matches!(self, Self::V3(_))
    }

    fn invalidate(&mut self) {
        if let Self::V1(browser) | Self::V2(browser) = self {
            browser.invalidate();
        }
    }

    pub fn list_elements(
        &mut self,
        parent_item_id: Option<&str>,
        filter: &ElementFilter,
        query: Option<&PropertiesQuery>,
    ) -> OpcResult<Vec<BrowseElement>> {
        match self {
            Self::V1(browser) | Self::V2(browser) => {
                browser.list_elements(parent_item_id, filter, query)
            }
            Self::V3(browser) => browser.list_elements(parent_item_id, filter, query),
        }
    }

    pub fn get_properties(
        &self,
        item_ids: &[String],
        query: &PropertiesQuery,
    ) -> OpcResult<Vec<ItemProperties>> {
        match self {
            Self::V1(browser) | Self::V2(browser) => browser.get_properties(item_ids, query),
            Self::V3(browser) => browser.get_properties(item_ids, query),
        }
    }
}

/// Dispatches browse calls to the newest advertised protocol revision,
/// falling back to older ones when a revision fails.
///
/// One instance per server binding. DA 1.0 and DA 2.05 drive the same
/// remote cursor, so whenever dispatch switches between them the browser
/// taking over forgets where it believed the cursor was.
pub struct AutoBrowser {
    capabilities: ServerCapabilities,
    /// Newest first.
    browsers: Vec<RevisionBrowser>,
    cursor_owner: Option<ProtocolRevision>,
}

impl std::fmt::Debug for AutoBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoBrowser")
            .field("capabilities", &self.capabilities)
            .field("cursor_owner", &self.cursor_owner)
            .finish_non_exhaustive()
    }
}

impl AutoBrowser {
    /// Discovers the advertised revisions and binds one browser to each.
    ///
    /// A failed discovery counts as advertising nothing.
    ///
    /// # Errors
    /// Returns [`OpcError::Unsupported`] when the server advertises none of
    /// DA 1.0, DA 2.05 or DA 3.0.
    pub fn new(server: &dyn ConnectedServer, limits: BrowseLimits) -> OpcResult<Self> {
        let capabilities = server.capabilities().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Capability discovery failed, assuming none");
            ServerCapabilities::new()
        });
        if capabilities.is_empty() {
            return Err(unsupported_server());
        }

        let browsers = ProtocolRevision::NEWEST_FIRST
            .into_iter()
            .filter(|rev| capabilities.contains(rev))
            .map(|rev| RevisionBrowser::bind(rev, server, limits))
            .collect();
        tracing::debug!(?capabilities, "Bound revision browsers");

        Ok(Self {
            capabilities,
            browsers,
            cursor_owner: None,
        })
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Bound revisions in dispatch order.
    pub fn revisions(&self) -> Vec<ProtocolRevision> {
        self.browsers.iter().map(RevisionBrowser::revision).collect()
    }

    /// Children of `parent_item_id` (`None` or `""` is the root).
    ///
    /// # Errors
    /// [`OpcError::Aggregate`] with one entry per attempted revision when
    /// every revision failed.
    pub fn list_elements(
        &mut self,
        parent_item_id: Option<&str>,
        filter: &ElementFilter,
        query: Option<&PropertiesQuery>,
    ) -> OpcResult<Vec<BrowseElement>> {
        let mut failures = Vec::new();
        for idx in 0..self.browsers.len() {
            self.take_cursor(idx);
            let browser = &mut self.browsers[idx];
            let revision = browser.revision();
            match browser.list_elements(parent_item_id, filter, query) {
                Ok(elements) => return Ok(elements),
                Err(error) => {
                    tracing::warn!(
                        revision = %revision,
                        parent = parent_item_id.unwrap_or_default(),
                        error = %error,
                        "Browse failed, falling back"
                    );
                    failures.push(RevisionFailure { revision, error });
                }
            }
        }
        Err(exhausted(failures))
    }

    /// One record per identifier, in input order.
    ///
    /// # Errors
    /// [`OpcError::Aggregate`] when every revision failed.
    pub fn get_properties(
        &self,
        item_ids: &[String],
        query: &PropertiesQuery,
    ) -> OpcResult<Vec<ItemProperties>> {
        let mut failures = Vec::new();
        for browser in &self.browsers {
            let revision = browser.revision();
            match browser.get_properties(item_ids, query) {
                Ok(props) => return Ok(props),
                Err(error) => {
                    tracing::warn!(revision = %revision, error = %error, "Property query failed, falling back");
                    failures.push(RevisionFailure { revision, error });
                }
            }
        }
        Err(exhausted(failures))
    }

    fn take_cursor(&mut self, idx: usize) {
        let browser = &mut self.browsers[idx];
        if !browser.uses_cursor() {
            return;
        }
        let revision = browser.revision();
        if self.cursor_owner.is_some_and(|owner| owner != revision) {
            tracing::debug!(revision = %revision, "Cursor moved by another revision, resetting");
            browser.invalidate();
        }
        self.cursor_owner = Some(revision);
    }
}

fn unsupported_server() -> OpcError {
    OpcError::Unsupported("server does not advertise DA 1.0, 2.05 or 3.0".into())
}

fn exhausted(failures: Vec<RevisionFailure>) -> OpcError {
    if failures.is_empty() {
        unsupported_server()
    } else {
        OpcError::Aggregate(failures)
    }
}
