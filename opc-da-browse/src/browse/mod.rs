//! Address-space browsing over the connector traits.
//!
//! [`AutoBrowser`] is the entry point. Below it sit one browser per protocol
//! revision: [`CursorBrowser`] drives the stateful DA 1.0/2.05 cursor
//! through a [`CursorNavigator`], and [`ItemBrowser`] uses the stateless
//! DA 3.0 interface.

mod auto;
mod cursor_browser;
mod enumerator;
mod item_browser;
mod navigator;
mod path_cache;
mod properties;
mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use auto::{AutoBrowser, RevisionBrowser};
pub use cursor_browser::CursorBrowser;
pub use enumerator::ElementEnumerator;
pub use item_browser::ItemBrowser;
pub use navigator::{CursorNavigator, CursorState};
pub use path_cache::{BrowsePath, CachedPath, PathCache, eq_ignore_case};
pub use properties::PropertyFetcher;
pub use resolver::{IdentifierResolver, Resolution, extract_browse_name};
