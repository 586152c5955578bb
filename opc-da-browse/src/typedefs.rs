//! Value types shared by the browsing core, the provider API and the backends.

use std::collections::BTreeSet;
use std::fmt;

/// OPC DA specification revisions a server may advertise through its
/// implemented component categories.
///
/// Ordering follows age, so the newest revision compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolRevision {
    /// OPC DA 1.0a (`CATID_OPCDAServer10`).
    V1,
    /// OPC DA 2.05 (`CATID_OPCDAServer20`).
    V2,
    /// OPC DA 3.0 (`CATID_OPCDAServer30`).
    V3,
}

impl ProtocolRevision {
    /// All revisions, newest first. This is the fallback order.
    pub const NEWEST_FIRST: [Self; 3] = [Self::V3, Self::V2, Self::V1];

    /// Registry form of the component category identifier.
    pub const fn category_id(self) -> &'static str {
        match self {
            Self::V1 => "{63D5F430-CFE4-11D1-B2C8-0060083BA1FB}",
            Self::V2 => "{63D5F432-CFE4-11D1-B2C8-0060083BA1FB}",
            Self::V3 => "{CC603642-66D7-48F1-B69A-B625E73652D7}",
        }
    }

    /// Maps a category identifier (any case, braces optional) to a revision.
    pub fn from_category_id(catid: &str) -> Option<Self> {
        let bare = catid.trim().trim_start_matches('{').trim_end_matches('}');
        Self::NEWEST_FIRST.into_iter().find(|rev| {
            rev.category_id()
                .trim_start_matches('{')
                .trim_end_matches('}')
                .eq_ignore_ascii_case(bare)
        })
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1 => "DA 1.0",
            Self::V2 => "DA 2.05",
            Self::V3 => "DA 3.0",
        })
    }
}

/// Revisions a server advertises. Resolved once per binding.
pub type ServerCapabilities = BTreeSet<ProtocolRevision>;

/// Typology of the server's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceType {
    Hierarchical,
    Flat,
}

/// What `BrowseOPCItemIDs` should enumerate at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseType {
    Branch,
    Leaf,
    Flat,
}

/// Granular filter for enumeration results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowseFilter {
    #[default]
    All,
    Branches,
    Items,
}

/// Access rights filter, using the OPC `OPC_READABLE`/`OPC_WRITEABLE` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessRights {
    #[default]
    Ignore,
    Readable,
    Writable,
    ReadWritable,
}

impl AccessRights {
    /// Bit mask passed to the server. Zero disables the filter.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Ignore => 0,
            Self::Readable => 1,
            Self::Writable => 2,
            Self::ReadWritable => 3,
        }
    }
}

/// Caller-supplied criteria for [`list_elements`](crate::AutoBrowser::list_elements).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementFilter {
    /// Server-side wildcard on element names. Empty matches everything.
    pub name: String,
    /// Branches, items or both.
    pub element_kind: BrowseFilter,
    /// Requested canonical `VT_*` type. `0` (`VT_EMPTY`) matches any type.
    pub data_type: u16,
    /// Required access rights of returned items.
    pub access_rights: AccessRights,
    /// Vendor-specific filter, only understood by DA 3.0 servers.
    pub vendor_filter: Option<String>,
}

impl ElementFilter {
    /// Filter selecting only the given kind of element.
    pub fn of_kind(element_kind: BrowseFilter) -> Self {
        Self {
            element_kind,
            ..Self::default()
        }
    }
}

/// Caller-supplied selection of item properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertiesQuery {
    /// Return every property the server knows for the item.
    pub all_properties: bool,
    /// Properties to keep when `all_properties` is `false`.
    pub property_ids: Vec<u32>,
    /// Read the current property values as well as their descriptions.
    pub return_values: bool,
}

impl Default for PropertiesQuery {
    fn default() -> Self {
        Self {
            all_properties: true,
            property_ids: Vec::new(),
            return_values: true,
        }
    }
}

impl PropertiesQuery {
    /// Query for an explicit set of properties.
    pub fn with_ids(property_ids: impl Into<Vec<u32>>, return_values: bool) -> Self {
        Self {
            all_properties: false,
            property_ids: property_ids.into(),
            return_values,
        }
    }
}

/// Whether an element can be descended into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Branch,
    Leaf,
}

/// One child returned by a browse.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseElement {
    /// Short browse name at the parent position.
    pub name: String,
    /// Fully qualified item identifier, when the server exposes one.
    pub item_id: Option<String>,
    pub kind: ElementKind,
    /// Filled in by a second pass; empty unless a properties query was given.
    pub properties: ItemProperties,
}

impl BrowseElement {
    pub fn branch(name: impl Into<String>, item_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            item_id,
            kind: ElementKind::Branch,
            properties: ItemProperties::default(),
        }
    }

    pub fn leaf(name: impl Into<String>, item_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            item_id,
            kind: ElementKind::Leaf,
            properties: ItemProperties::default(),
        }
    }

    pub fn has_children(&self) -> bool {
        self.kind == ElementKind::Branch
    }

    pub fn is_item(&self) -> bool {
        self.kind == ElementKind::Leaf
    }
}

/// Metadata of a single item. Empty when the server could not be queried.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemProperties {
    pub properties: Vec<ItemProperty>,
    /// Why the record is empty, when processing of the item failed.
    pub error: Option<String>,
}

impl ItemProperties {
    /// Record substituted for an item whose processing failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            properties: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Keeps only the properties whose id is in `ids`.
    pub fn retain_ids(&mut self, ids: &[u32]) {
        self.properties.retain(|p| ids.contains(&p.id));
    }

    pub fn get(&self, id: u32) -> Option<&ItemProperty> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.properties.iter().map(|p| p.id).collect()
    }
}

/// One property of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemProperty {
    pub id: u32,
    pub description: String,
    /// Canonical `VT_*` type of the property value.
    pub data_type: u16,
    /// Present when values were requested and the read succeeded.
    pub value: Option<OpcValue>,
    /// Item identifier under which the property is itself readable.
    pub item_id: Option<String>,
    /// Per-property failure reported by the server.
    pub error: Option<String>,
}

impl ItemProperty {
    pub fn new(id: u32, description: impl Into<String>, data_type: u16) -> Self {
        Self {
            id,
            description: description.into(),
            data_type,
            value: None,
            item_id: None,
            error: None,
        }
    }
}

/// Decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum OpcValue {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(chrono::DateTime<chrono::Utc>),
    /// Array value; only the element count is decoded.
    Array(usize),
    /// Any other variant type, rendered as text.
    Other(String),
}

impl fmt::Display for OpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Date(d) => write!(
                f,
                "{}",
                d.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            Self::Array(n) => write!(f, "Array[{n}]"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Well-known OPC DA item property identifiers.
pub mod property_ids {
    pub const DATA_TYPE: u32 = 1;
    pub const VALUE: u32 = 2;
    pub const QUALITY: u32 = 3;
    pub const TIMESTAMP: u32 = 4;
    pub const ACCESS_RIGHTS: u32 = 5;
    pub const SCAN_RATE: u32 = 6;
    pub const EU_TYPE: u32 = 7;
    pub const EU_INFO: u32 = 8;
    pub const EU_UNITS: u32 = 100;
    pub const DESCRIPTION: u32 = 101;
    pub const HIGH_EU: u32 = 102;
    pub const LOW_EU: u32 = 103;
    pub const HIGH_IR: u32 = 104;
    pub const LOW_IR: u32 = 105;
    pub const CLOSE_LABEL: u32 = 106;
    pub const OPEN_LABEL: u32 = 107;
    pub const TIMEZONE: u32 = 108;

    /// Human-readable name of a standard property id.
    pub const fn name(id: u32) -> Option<&'static str> {
        match id {
            DATA_TYPE => Some("Item Canonical DataType"),
            VALUE => Some("Item Value"),
            QUALITY => Some("Item Quality"),
            TIMESTAMP => Some("Item Timestamp"),
            ACCESS_RIGHTS => Some("Item Access Rights"),
            SCAN_RATE => Some("Server Scan Rate"),
            EU_TYPE => Some("Item EU Type"),
            EU_INFO => Some("Item EU Info"),
            EU_UNITS => Some("EU Units"),
            DESCRIPTION => Some("Item Description"),
            HIGH_EU => Some("High EU"),
            LOW_EU => Some("Low EU"),
            HIGH_IR => Some("High Instrument Range"),
            LOW_IR => Some("Low Instrument Range"),
            CLOSE_LABEL => Some("Contact Close Label"),
            OPEN_LABEL => Some("Contact Open Label"),
            TIMEZONE => Some("Item Timezone"),
            _ => None,
        }
    }
}

/// Caps on the work a single browse call may perform against the server.
///
/// # Examples
///
/// ```
/// use opc_da_browse::BrowseLimits;
/// let limits = BrowseLimits::default();
/// assert_eq!(limits.max_search_depth, 64);
/// assert_eq!(limits.max_search_nodes, 20_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseLimits {
    /// Deepest level the identifier search descends to.
    pub max_search_depth: usize,
    /// Total nodes the identifier search may inspect before giving up.
    pub max_search_nodes: usize,
    /// Upper bound on `UP` moves when the server lacks `BROWSE_TO ""`.
    pub max_root_ascent: usize,
    /// Page size requested from DA 3.0 `Browse`. `0` lets the server decide.
    pub max_elements_per_page: u32,
}

impl Default for BrowseLimits {
    fn default() -> Self {
        Self {
            max_search_depth: 64,
            max_search_nodes: 20_000,
            max_root_ascent: 1000,
            max_elements_per_page: 0,
        }
    }
}
