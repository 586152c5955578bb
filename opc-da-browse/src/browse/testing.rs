//! Scripted in-memory server used by the browsing tests.

use crate::browse::path_cache::eq_ignore_case;
use crate::connector::{
    AddressSpace, BrowseDirection, BrowsePage, BrowseRequest, ConnectedServer, ItemPropertySource,
    PropertyDescriptor, PropertyOutcome, RemoteElement, RemoteItemProperties, RemoteProperty,
    ServerBrowse,
};
use crate::errors::{E_FAIL, E_INVALIDARG, OpcError, OpcResult};
use crate::typedefs::{
    BrowseFilter, BrowseType, NamespaceType, OpcValue, ProtocolRevision, ServerCapabilities,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub const OPC_E_UNKNOWNITEMID: u32 = 0xC004_0007;
pub const RPC_S_SERVER_UNAVAILABLE: u32 = 0x8007_06BA;

/// A remote call as observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Organization,
    Up,
    Down(String),
    To(String),
    Browse(BrowseType),
    ItemId(String),
}

/// How the fake renders item identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStyle {
    /// `Channel1.Device1.Tag1`
    Dotted,
    /// `[Channel1]Device1.Tag1`
    Bracketed,
    /// `GetItemID` always fails.
    Unavailable,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    leaf: bool,
    data_type: u16,
    access: u32,
    children: Vec<Node>,
}

impl Node {
    fn branch(name: &str) -> Self {
        Self {
            name: name.to_string(),
            leaf: false,
            data_type: 0,
            access: 0,
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|c| eq_ignore_case(&c.name, name))
    }
}

struct Injected {
    call: Call,
    code: u32,
    remaining: usize,
}

/// In-memory `IOPCBrowseServerAddressSpace` with a real cursor and a call log.
pub struct FakeAddressSpace {
    root: Node,
    organization: NamespaceType,
    style: IdStyle,
    browse_to_root: bool,
    aliases: HashMap<String, Vec<String>>,
    cursor: RefCell<Vec<String>>,
    calls: RefCell<Vec<Call>>,
    injected: RefCell<Vec<Injected>>,
    disconnected: Cell<bool>,
}

impl FakeAddressSpace {
    /// Builds a hierarchical tree. `"A/B/C"` creates branches `A`, `B` and
    /// leaf `C`; a trailing slash (`"A/B/"`) creates branches only.
    pub fn from_paths(paths: &[&str]) -> Self {
        let mut root = Node::branch("");
        for path in paths {
            let is_branch = path.ends_with('/');
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            let mut node = &mut root;
            for (idx, segment) in segments.iter().enumerate() {
                let leaf = !is_branch && idx == segments.len() - 1;
                let pos = node.children.iter().position(|c| c.name == *segment);
                let pos = pos.unwrap_or_else(|| {
                    let mut child = Node::branch(segment);
                    if leaf {
                        child.leaf = true;
                        child.data_type = 5;
                        child.access = 3;
                    }
                    node.children.push(child);
                    node.children.len() - 1
                });
                node = &mut node.children[pos];
            }
        }
        Self {
            root,
            organization: NamespaceType::Hierarchical,
            style: IdStyle::Dotted,
            browse_to_root: true,
            aliases: HashMap::new(),
            cursor: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            injected: RefCell::new(Vec::new()),
            disconnected: Cell::new(false),
        }
    }

    /// Flat namespace holding the given item ids.
    pub fn flat(item_ids: &[&str]) -> Self {
        let mut space = Self::from_paths(item_ids);
        space.organization = NamespaceType::Flat;
        space
    }

    pub fn with_id_style(mut self, style: IdStyle) -> Self {
        self.style = style;
        self
    }

    /// Server rejects `BROWSE_TO ""`, forcing the `UP` loop.
    pub fn without_browse_to_root(mut self) -> Self {
        self.browse_to_root = false;
        self
    }

    /// Makes `BROWSE_TO target` land on `path` (slash separated).
    pub fn with_browse_to_alias(mut self, target: &str, path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.aliases.insert(target.to_uppercase(), segments);
        self
    }

    /// Sets the data type and access rights of a leaf (slash separated path).
    pub fn with_leaf_attributes(mut self, path: &str, data_type: u16, access: u32) -> Self {
        let mut node = &mut self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let pos = node
                .children
                .iter()
                .position(|c| c.name == segment)
                .expect("leaf path exists");
            node = &mut node.children[pos];
        }
        node.data_type = data_type;
        node.access = access;
        self
    }

    /// Fails the next `times` occurrences of `call` with `code`.
    pub fn fail(&self, call: Call, code: u32, times: usize) {
        self.injected.borrow_mut().push(Injected {
            call,
            code,
            remaining: times,
        });
    }

    /// Every subsequent call fails with a transport fault.
    pub fn disconnect(&self) {
        self.disconnected.set(true);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn ups(&self) -> usize {
        self.count(|c| *c == Call::Up)
    }

    pub fn downs(&self) -> usize {
        self.count(|c| matches!(c, Call::Down(_)))
    }

    pub fn searches(&self) -> usize {
        self.count(|c| matches!(c, Call::Browse(BrowseType::Branch)))
    }

    /// Real server-side cursor.
    pub fn cursor(&self) -> Vec<String> {
        self.cursor.borrow().clone()
    }

    /// Moves the real cursor behind the client's back.
    pub fn set_cursor(&self, path: &[&str]) {
        *self.cursor.borrow_mut() = path.iter().map(ToString::to_string).collect();
    }

    pub fn id_of(&self, path: &[String]) -> Option<String> {
        match self.style {
            IdStyle::Dotted => Some(path.join(".")),
            IdStyle::Bracketed => match path.split_first() {
                Some((first, rest)) if !rest.is_empty() => {
                    Some(format!("[{first}]{}", rest.join(".")))
                }
                Some((first, _)) => Some(format!("[{first}]")),
                None => None,
            },
            IdStyle::Unavailable => None,
        }
    }

    fn enter(&self, call: Call) -> OpcResult<()> {
        self.calls.borrow_mut().push(call.clone());
        if self.disconnected.get() {
            return Err(OpcError::from_hresult(RPC_S_SERVER_UNAVAILABLE, "disconnected"));
        }
        let mut injected = self.injected.borrow_mut();
        if let Some(inj) = injected
            .iter_mut()
            .find(|i| i.call == call && i.remaining > 0)
        {
            inj.remaining -= 1;
            return Err(OpcError::from_hresult(inj.code, format!("injected {call:?}")));
        }
        Ok(())
    }

    fn node_at(&self, path: &[String]) -> Option<&Node> {
        path.iter().try_fold(&self.root, |node, seg| node.child(seg))
    }

    fn find_branch_by_id(&self, id: &str) -> Option<Vec<String>> {
        fn walk(space: &FakeAddressSpace, node: &Node, path: &mut Vec<String>, id: &str) -> Option<Vec<String>> {
            for child in node.children.iter().filter(|c| !c.leaf) {
                path.push(child.name.clone());
                if space.id_of(path).is_some_and(|cid| eq_ignore_case(&cid, id)) {
                    return Some(path.clone());
                }
                if let Some(found) = walk(space, child, path, id) {
                    return Some(found);
                }
                path.pop();
            }
            None
        }
        walk(self, &self.root, &mut Vec::new(), id)
    }

    fn leaf_ids(&self, node: &Node, path: &mut Vec<String>, out: &mut Vec<(String, u16, u32)>) {
        for child in &node.children {
            path.push(child.name.clone());
            if child.leaf {
                out.push((path.join("."), child.data_type, child.access));
            } else {
                self.leaf_ids(child, path, out);
            }
            path.pop();
        }
    }
}

fn name_matches(filter: &str, name: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    globset::GlobBuilder::new(filter)
        .case_insensitive(true)
        .build()
        .map(|g| g.compile_matcher().is_match(name))
        .unwrap_or(false)
}

fn attributes_match(node_type: u16, node_access: u32, data_type: u16, access: u32) -> bool {
    (data_type == 0 || node_type == data_type) && (access == 0 || node_access & access == access)
}

impl AddressSpace for FakeAddressSpace {
    fn organization(&self) -> OpcResult<NamespaceType> {
        self.enter(Call::Organization)?;
        Ok(self.organization)
    }

    fn change_position(&self, direction: BrowseDirection<'_>) -> OpcResult<()> {
        match direction {
            BrowseDirection::Up => {
                self.enter(Call::Up)?;
                let mut cursor = self.cursor.borrow_mut();
                if cursor.pop().is_none() {
                    return Err(OpcError::from_hresult(E_FAIL, "already at root"));
                }
                Ok(())
            }
            BrowseDirection::Down(name) => {
                self.enter(Call::Down(name.to_string()))?;
                let current = self.cursor();
                let child = self
                    .node_at(&current)
                    .and_then(|n| n.child(name))
                    .filter(|c| !c.leaf)
                    .ok_or_else(|| OpcError::from_hresult(E_INVALIDARG, "no such branch"))?;
                self.cursor.borrow_mut().push(child.name.clone());
                Ok(())
            }
            BrowseDirection::To(target) => {
                self.enter(Call::To(target.to_string()))?;
                if target.is_empty() {
                    if !self.browse_to_root {
                        return Err(OpcError::from_hresult(E_INVALIDARG, "BROWSE_TO unsupported"));
                    }
                    self.cursor.borrow_mut().clear();
                    return Ok(());
                }
                let path = self
                    .aliases
                    .get(&target.to_uppercase())
                    .cloned()
                    .or_else(|| self.find_branch_by_id(target))
                    .ok_or_else(|| OpcError::from_hresult(E_INVALIDARG, "unknown branch id"))?;
                *self.cursor.borrow_mut() = path;
                Ok(())
            }
        }
    }

    fn browse_names(
        &self,
        browse_type: BrowseType,
        name_filter: &str,
        data_type: u16,
        access_rights: u32,
    ) -> OpcResult<Vec<String>> {
        self.enter(Call::Browse(browse_type))?;
        if browse_type == BrowseType::Flat {
            let mut out = Vec::new();
            self.leaf_ids(&self.root, &mut Vec::new(), &mut out);
            return Ok(out
                .into_iter()
                .filter(|(id, dt, ar)| {
                    name_matches(name_filter, id) && attributes_match(*dt, *ar, data_type, access_rights)
                })
                .map(|(id, _, _)| id)
                .collect());
        }
        let current = self.cursor();
        let node = self
            .node_at(&current)
            .ok_or_else(|| OpcError::from_hresult(E_FAIL, "cursor lost"))?;
        let want_leaf = browse_type == BrowseType::Leaf;
        Ok(node
            .children
            .iter()
            .filter(|c| c.leaf == want_leaf && name_matches(name_filter, &c.name))
            .filter(|c| !want_leaf || attributes_match(c.data_type, c.access, data_type, access_rights))
            .map(|c| c.name.clone())
            .collect())
    }

    fn item_id(&self, name: &str) -> OpcResult<String> {
        self.enter(Call::ItemId(name.to_string()))?;
        let mut path = self.cursor();
        let child = self
            .node_at(&path)
            .and_then(|n| n.child(name))
            .ok_or_else(|| OpcError::from_hresult(E_INVALIDARG, "no such child"))?;
        path.push(child.name.clone());
        self.id_of(&path)
            .ok_or_else(|| OpcError::from_hresult(E_FAIL, "GetItemID not supported"))
    }
}

/// In-memory `IOPCItemProperties`.
#[derive(Default)]
pub struct FakeProperties {
    items: HashMap<String, Vec<(PropertyDescriptor, OpcValue)>>,
    transport_failures: RefCell<Vec<String>>,
    pub queried: RefCell<Vec<String>>,
}

impl FakeProperties {
    /// Every item gets data type, value and description properties.
    pub fn for_items(item_ids: &[&str]) -> Self {
        let mut items = HashMap::new();
        for id in item_ids {
            items.insert(
                id.to_uppercase(),
                vec![
                    (
                        PropertyDescriptor {
                            id: 1,
                            description: "Item Canonical DataType".into(),
                            data_type: 2,
                        },
                        OpcValue::Int(5),
                    ),
                    (
                        PropertyDescriptor {
                            id: 2,
                            description: "Item Value".into(),
                            data_type: 5,
                        },
                        OpcValue::Float(42.5),
                    ),
                    (
                        PropertyDescriptor {
                            id: 101,
                            description: "Item Description".into(),
                            data_type: 8,
                        },
                        OpcValue::String(format!("{id} description")),
                    ),
                ],
            );
        }
        Self {
            items,
            ..Self::default()
        }
    }

    /// Queries for `item_id` fail with a transport fault.
    pub fn break_item(&self, item_id: &str) {
        self.transport_failures.borrow_mut().push(item_id.to_uppercase());
    }

    fn lookup(&self, item_id: &str) -> OpcResult<&Vec<(PropertyDescriptor, OpcValue)>> {
        if self.transport_failures.borrow().contains(&item_id.to_uppercase()) {
            return Err(OpcError::from_hresult(RPC_S_SERVER_UNAVAILABLE, "broken item"));
        }
        self.items
            .get(&item_id.to_uppercase())
            .ok_or_else(|| OpcError::from_hresult(OPC_E_UNKNOWNITEMID, "unknown item"))
    }
}

impl ItemPropertySource for FakeProperties {
    fn query_available_properties(&self, item_id: &str) -> OpcResult<Vec<PropertyDescriptor>> {
        self.queried.borrow_mut().push(item_id.to_string());
        Ok(self.lookup(item_id)?.iter().map(|(d, _)| d.clone()).collect())
    }

    fn get_item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcResult<Vec<PropertyOutcome<OpcValue>>> {
        let props = self.lookup(item_id)?;
        Ok(property_ids
            .iter()
            .map(|pid| {
                props
                    .iter()
                    .find(|(d, _)| d.id == *pid)
                    .map(|(_, v)| v.clone())
                    .ok_or(0xC004_0203)
            })
            .collect())
    }

    fn lookup_item_ids(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcResult<Vec<PropertyOutcome<String>>> {
        self.lookup(item_id)?;
        Ok(property_ids
            .iter()
            .map(|pid| {
                if *pid >= 100 {
                    Ok(format!("{item_id}.Prop{pid}"))
                } else {
                    Err(0xC004_0203)
                }
            })
            .collect())
    }
}

/// In-memory DA 3.0 `IOPCBrowse` over the same kind of tree.
pub struct FakeBrowse {
    space: FakeAddressSpace,
    page_size: usize,
    pub requests: RefCell<Vec<(String, Option<String>)>>,
    failure: Cell<Option<u32>>,
}

impl FakeBrowse {
    pub fn new(space: FakeAddressSpace, page_size: usize) -> Self {
        Self {
            space,
            page_size,
            requests: RefCell::new(Vec::new()),
            failure: Cell::new(None),
        }
    }

    pub fn fail_with(&self, code: u32) {
        self.failure.set(Some(code));
    }

    fn path_of(&self, item_id: &str) -> OpcResult<Vec<String>> {
        if item_id.is_empty() {
            return Ok(Vec::new());
        }
        self.space
            .find_branch_by_id(item_id)
            .ok_or_else(|| OpcError::from_hresult(OPC_E_UNKNOWNITEMID, "unknown branch"))
    }

    fn remote_properties(id: &str, values: bool) -> Vec<RemoteProperty> {
        vec![RemoteProperty {
            id: 101,
            description: "Item Description".into(),
            data_type: 8,
            item_id: None,
            value: values.then(|| OpcValue::String(format!("{id} description"))),
            error: None,
        }]
    }
}

impl ServerBrowse for FakeBrowse {
    fn browse(&self, request: &BrowseRequest<'_>) -> OpcResult<BrowsePage> {
        self.requests.borrow_mut().push((
            request.item_id.to_string(),
            request.continuation_point.map(str::to_string),
        ));
        if let Some(code) = self.failure.get() {
            return Err(OpcError::from_hresult(code, "injected browse failure"));
        }
        let path = self.path_of(request.item_id)?;
        let node = self
            .space
            .node_at(&path)
            .ok_or_else(|| OpcError::from_hresult(OPC_E_UNKNOWNITEMID, "unknown branch"))?;
        let wanted: Vec<&Node> = node
            .children
            .iter()
            .filter(|c| match request.filter {
                BrowseFilter::All => true,
                BrowseFilter::Branches => !c.leaf,
                BrowseFilter::Items => c.leaf,
            })
            .filter(|c| name_matches(request.name_filter, &c.name))
            .collect();
        let start: usize = request
            .continuation_point
            .and_then(|cp| cp.strip_prefix("cp:"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let end = (start + self.page_size).min(wanted.len());
        let want_props = request.return_all_properties || !request.property_ids.is_empty();
        let elements = wanted[start..end]
            .iter()
            .map(|c| {
                let mut child_path = path.clone();
                child_path.push(c.name.clone());
                let id = self.space.id_of(&child_path);
                let props = if want_props {
                    Self::remote_properties(id.as_deref().unwrap_or(&c.name), request.return_property_values)
                } else {
                    Vec::new()
                };
                RemoteElement {
                    name: c.name.clone(),
                    item_id: id,
                    has_children: !c.leaf,
                    is_item: c.leaf,
                    properties: Ok(props),
                }
            })
            .collect();
        let more = end < wanted.len();
        Ok(BrowsePage {
            elements,
            continuation_point: more.then(|| format!("cp:{end}")),
            more_elements: more,
        })
    }

    fn get_properties(
        &self,
        item_ids: &[String],
        return_property_values: bool,
        _property_ids: &[u32],
    ) -> OpcResult<Vec<RemoteItemProperties>> {
        if let Some(code) = self.failure.get() {
            return Err(OpcError::from_hresult(code, "injected properties failure"));
        }
        Ok(item_ids
            .iter()
            .map(|id| {
                if id.contains("Missing") {
                    Err(OPC_E_UNKNOWNITEMID)
                } else {
                    Ok(Self::remote_properties(id, return_property_values))
                }
            })
            .collect())
    }
}

/// A bound server exposing whichever fakes were supplied.
#[derive(Default)]
pub struct FakeServer {
    pub capabilities: Option<Vec<ProtocolRevision>>,
    pub space: Option<Rc<FakeAddressSpace>>,
    pub properties: Option<Rc<FakeProperties>>,
    pub browse: Option<Rc<FakeBrowse>>,
    pub connected: Cell<bool>,
}

impl FakeServer {
    pub fn new(capabilities: &[ProtocolRevision]) -> Self {
        Self {
            capabilities: Some(capabilities.to_vec()),
            connected: Cell::new(true),
            ..Self::default()
        }
    }

    pub fn with_space(mut self, space: &Rc<FakeAddressSpace>) -> Self {
        self.space = Some(Rc::clone(space));
        self
    }

    pub fn with_properties(mut self, props: &Rc<FakeProperties>) -> Self {
        self.properties = Some(Rc::clone(props));
        self
    }

    pub fn with_browse(mut self, browse: &Rc<FakeBrowse>) -> Self {
        self.browse = Some(Rc::clone(browse));
        self
    }
}

impl ConnectedServer for FakeServer {
    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn capabilities(&self) -> OpcResult<ServerCapabilities> {
        self.capabilities
            .as_ref()
            .map(|caps| caps.iter().copied().collect())
            .ok_or_else(|| OpcError::from_hresult(RPC_S_SERVER_UNAVAILABLE, "category lookup"))
    }

    fn address_space(&self) -> Option<Rc<dyn AddressSpace>> {
        self.space
            .as_ref()
            .map(|s| Rc::clone(s) as Rc<dyn AddressSpace>)
    }

    fn item_properties(&self) -> Option<Rc<dyn ItemPropertySource>> {
        self.properties
            .as_ref()
            .map(|p| Rc::clone(p) as Rc<dyn ItemPropertySource>)
    }

    fn browse(&self) -> Option<Rc<dyn ServerBrowse>> {
        self.browse
            .as_ref()
            .map(|b| Rc::clone(b) as Rc<dyn ServerBrowse>)
    }
}

/// The plant used by most tests.
pub fn plant() -> FakeAddressSpace {
    FakeAddressSpace::from_paths(&[
        "Channel1/Device1/Tag1",
        "Channel1/Device1/Tag2",
        "Channel1/Device1/Alarms/HighTemp",
        "Channel1/Device2/Pressure",
        "Channel2/Device3/Flow",
        "Simulation/Ramp",
        "Simulation/Sine",
        "Empty/",
        "Status",
    ])
}
