//! COM implementation of the connector traits, built on the `opc_da` client
//! traits and the `opc_da_bindings` interfaces.
//!
//! All interfaces of one server are obtained by casting a single `IUnknown`,
//! so a DA 2.05 server without `IOPCItemProperties` still browses.

use crate::backend::variant::variant_to_value;
use crate::connector::{
    AddressSpace, BrowseDirection, BrowsePage, BrowseRequest, ConnectedServer, ItemPropertySource,
    PropertyDescriptor, PropertyOutcome, RemoteElement, RemoteItemProperties, RemoteProperty,
    ServerBrowse, ServerConnector,
};
use crate::errors::{OpcError, OpcResult, friendly_com_hint};
use crate::typedefs::{
    BrowseFilter, BrowseType, NamespaceType, OpcValue, ProtocolRevision, ServerCapabilities,
};
use opc_da::client::{
    BrowseServerAddressSpaceTrait, BrowseTrait, ClientTrait, ItemPropertiesTrait, StringIterator,
    v1, v2, v3,
};
use opc_da::utils::RemotePointer;
use opc_da_bindings::{
    IOPCBrowse, IOPCBrowseServerAddressSpace, IOPCItemProperties, IOPCServer,
    tagOPCBROWSEELEMENT, tagOPCITEMPROPERTIES, tagOPCITEMPROPERTY, tagOPCSERVERSTATUS,
};
use std::rc::Rc;
use windows::Win32::System::Com::{
    CLSCTX_ALL, CLSIDFromProgID, CoCreateInstance, CoTaskMemFree, ProgIDFromCLSID,
};
use windows::Win32::System::Variant::{VARIANT, VariantClear};
use windows::core::{GUID, HRESULT, Interface as _, PCWSTR, PWSTR};

const OPC_BROWSE_HASCHILDREN: u32 = 0x01;
const OPC_BROWSE_ISITEM: u32 = 0x02;

/// Connects to OPC DA servers registered on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComConnector;

impl ServerConnector for ComConnector {
    type Server = ComServer;

    fn enumerate_servers(&self, host: &str) -> OpcResult<Vec<String>> {
        if !is_local_host(host) {
            return Err(OpcError::Unsupported(format!(
                "server enumeration on remote host '{host}'"
            )));
        }

        let mut servers = Vec::new();
        let mut last_error = None;
        for revision in ProtocolRevision::NEWEST_FIRST {
            match category_members(revision) {
                Ok(clsids) => {
                    for clsid in clsids {
                        match guid_to_progid(&clsid) {
                            Ok(progid) if !progid.is_empty() => servers.push(progid),
                            Ok(_) => {}
                            Err(e) => {
                                tracing::debug!(error = %e, ?clsid, "No ProgID for server class");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%revision, error = %e, "Server category enumeration failed");
                    last_error = Some(e);
                }
            }
        }

        if servers.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        servers.sort();
        servers.dedup();
        Ok(servers)
    }

    fn connect(&self, server_name: &str) -> OpcResult<Self::Server> {
        let clsid = progid_to_clsid(server_name)?;
        // SAFETY: `clsid` is a valid GUID on the stack; the returned interface
        // is owned and released on drop.
        let server: IOPCServer =
            unsafe { CoCreateInstance(&clsid, None, CLSCTX_ALL) }.map_err(|e| {
                let err = OpcError::from(e);
                let hint = friendly_com_hint(&err)
                    .unwrap_or("Check DCOM configuration and server status");
                tracing::error!(error = %err, server = %server_name, hint, "CoCreateInstance failed");
                err
            })?;
        Ok(ComServer::new(clsid, &server))
    }
}

/// A live COM binding with whichever browse interfaces the server implements.
pub struct ComServer {
    clsid: GUID,
    server: IOPCServer,
    address_space: Option<Rc<ComAddressSpace>>,
    item_properties: Option<Rc<ComItemProperties>>,
    browse: Option<Rc<ComBrowse>>,
}

impl ComServer {
    fn new(clsid: GUID, server: &IOPCServer) -> Self {
        let address_space = server
            .cast::<IOPCBrowseServerAddressSpace>()
            .ok()
            .map(|i| Rc::new(ComAddressSpace(i)));
        let item_properties = server
            .cast::<IOPCItemProperties>()
            .ok()
            .map(|i| Rc::new(ComItemProperties(i)));
        let browse = server
            .cast::<IOPCBrowse>()
            .ok()
            .map(|i| Rc::new(ComBrowse(i)));
        tracing::debug!(
            address_space = address_space.is_some(),
            item_properties = item_properties.is_some(),
            browse = browse.is_some(),
            "Discovered server interfaces"
        );
        Self {
            clsid,
            server: server.clone(),
            address_space,
            item_properties,
            browse,
        }
    }
}

impl ConnectedServer for ComServer {
    fn is_connected(&self) -> bool {
        // SAFETY: `GetStatus` hands back a caller-owned allocation, freed
        // below together with its vendor string.
        match unsafe { self.server.GetStatus() } {
            Ok(status) => {
                // SAFETY: `status` came from `GetStatus` and is freed once.
                unsafe { free_status(status) };
                true
            }
            Err(e) => {
                let err = OpcError::from(e);
                tracing::debug!(error = %err, "Server status probe failed");
                !err.is_transport()
            }
        }
    }

    fn capabilities(&self) -> OpcResult<ServerCapabilities> {
        let mut caps = ServerCapabilities::new();
        let mut last_error = None;
        for revision in ProtocolRevision::NEWEST_FIRST {
            match category_members(revision) {
                Ok(members) if members.contains(&self.clsid) => {
                    caps.insert(revision);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%revision, error = %e, "Category lookup failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if caps.is_empty() => Err(e),
            _ => Ok(caps),
        }
    }

    fn address_space(&self) -> Option<Rc<dyn AddressSpace>> {
        self.address_space
            .clone()
            .map(|s| s as Rc<dyn AddressSpace>)
    }

    fn item_properties(&self) -> Option<Rc<dyn ItemPropertySource>> {
        self.item_properties
            .clone()
            .map(|s| s as Rc<dyn ItemPropertySource>)
    }

    fn browse(&self) -> Option<Rc<dyn ServerBrowse>> {
        self.browse.clone().map(|s| s as Rc<dyn ServerBrowse>)
    }
}

struct ComAddressSpace(IOPCBrowseServerAddressSpace);

impl BrowseServerAddressSpaceTrait for ComAddressSpace {
    fn interface(&self) -> windows::core::Result<&IOPCBrowseServerAddressSpace> {
        Ok(&self.0)
    }
}

impl AddressSpace for ComAddressSpace {
    fn organization(&self) -> OpcResult<NamespaceType> {
        Ok(match self.query_organization()? {
            opc_da_bindings::OPC_NS_FLAT => NamespaceType::Flat,
            _ => NamespaceType::Hierarchical,
        })
    }

    fn change_position(&self, direction: BrowseDirection<'_>) -> OpcResult<()> {
        let (direction, position) = match direction {
            BrowseDirection::Up => (opc_da_bindings::OPC_BROWSE_UP, ""),
            BrowseDirection::Down(name) => (opc_da_bindings::OPC_BROWSE_DOWN, name),
            BrowseDirection::To(item_id) => (opc_da_bindings::OPC_BROWSE_TO, item_id),
        };
        Ok(self.change_browse_position(direction, position)?)
    }

    fn browse_names(
        &self,
        browse_type: BrowseType,
        name_filter: &str,
        data_type: u16,
        access_rights: u32,
    ) -> OpcResult<Vec<String>> {
        let browse_type = match browse_type {
            BrowseType::Branch => opc_da_bindings::OPC_BRANCH,
            BrowseType::Leaf => opc_da_bindings::OPC_LEAF,
            BrowseType::Flat => opc_da_bindings::OPC_FLAT,
        };
        let names = self.browse_opc_item_ids(browse_type, Some(name_filter), data_type, access_rights)?;
        Ok(StringIterator::new(names)
            .filter_map(|r| match r {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!(error = ?e, "Name iteration error, skipping");
                    None
                }
            })
            .collect())
    }

    fn item_id(&self, name: &str) -> OpcResult<String> {
        Ok(self.get_item_id(name)?)
    }
}

struct ComItemProperties(IOPCItemProperties);

impl ItemPropertiesTrait for ComItemProperties {
    fn interface(&self) -> windows::core::Result<&IOPCItemProperties> {
        Ok(&self.0)
    }
}

impl ItemPropertySource for ComItemProperties {
    fn query_available_properties(&self, item_id: &str) -> OpcResult<Vec<PropertyDescriptor>> {
        let (ids, descriptions, data_types) =
            ItemPropertiesTrait::query_available_properties(self, item_id)?;
        Ok(ids
            .as_slice()
            .iter()
            .zip(descriptions.as_slice())
            .zip(data_types.as_slice())
            .map(|((&id, &description), &data_type)| PropertyDescriptor {
                id,
                description: take_string(description).unwrap_or_default(),
                data_type,
            })
            .collect())
    }

    fn get_item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcResult<Vec<PropertyOutcome<OpcValue>>> {
        let (mut values, errors) =
            ItemPropertiesTrait::get_item_properties(self, item_id, property_ids)?;
        let outcomes = values
            .as_slice()
            .iter()
            .zip(errors.as_slice())
            .map(|(value, hr)| {
                if hr.is_ok() {
                    Ok(variant_to_value(value))
                } else {
                    Err(hresult_code(*hr))
                }
            })
            .collect();
        clear_variants(values.as_mut_slice());
        Ok(outcomes)
    }

    fn lookup_item_ids(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcResult<Vec<PropertyOutcome<String>>> {
        let (item_ids, errors) = ItemPropertiesTrait::lookup_item_ids(self, item_id, property_ids)?;
        Ok(item_ids
            .as_slice()
            .iter()
            .zip(errors.as_slice())
            .map(|(&id, hr)| {
                let id = take_string(id);
                if hr.is_ok() {
                    Ok(id.unwrap_or_default())
                } else {
                    Err(hresult_code(*hr))
                }
            })
            .collect())
    }
}

struct ComBrowse(IOPCBrowse);

impl BrowseTrait for ComBrowse {
    fn interface(&self) -> windows::core::Result<&IOPCBrowse> {
        Ok(&self.0)
    }
}

impl ServerBrowse for ComBrowse {
    fn browse(&self, request: &BrowseRequest<'_>) -> OpcResult<BrowsePage> {
        let filter = match request.filter {
            BrowseFilter::All => opc_da_bindings::OPC_BROWSE_FILTER_ALL,
            BrowseFilter::Branches => opc_da_bindings::OPC_BROWSE_FILTER_BRANCHES,
            BrowseFilter::Items => opc_da_bindings::OPC_BROWSE_FILTER_ITEMS,
        };
        let (more_elements, continuation_point, mut elements) = BrowseTrait::browse(
            self,
            Some(request.item_id),
            request.continuation_point,
            request.max_elements,
            filter,
            Some(request.name_filter),
            Some(request.vendor_filter),
            request.return_all_properties,
            request.return_property_values,
            request.property_ids,
        )?;

        Ok(BrowsePage {
            elements: elements.as_mut_slice().iter_mut().map(take_element).collect(),
            continuation_point: continuation_point.filter(|cp| !cp.is_empty()),
            more_elements,
        })
    }

    fn get_properties(
        &self,
        item_ids: &[String],
        return_property_values: bool,
        property_ids: &[u32],
    ) -> OpcResult<Vec<RemoteItemProperties>> {
        let mut results =
            BrowseTrait::get_properties(self, item_ids, return_property_values, property_ids)?;
        Ok(results
            .as_mut_slice()
            .iter_mut()
            .map(take_item_properties)
            .collect())
    }
}

/// `true` when `host` names this machine. Only local enumeration is supported.
fn is_local_host(host: &str) -> bool {
    let host = host.trim();
    if host.is_empty()
        || host == "."
        || host == "127.0.0.1"
        || host == "::1"
        || host.eq_ignore_ascii_case("localhost")
    {
        return true;
    }
    std::env::var("COMPUTERNAME").is_ok_and(|name| name.eq_ignore_ascii_case(host))
}

/// Class ids registered under a revision's component category.
fn category_members(revision: ProtocolRevision) -> OpcResult<Vec<GUID>> {
    let iter = match revision {
        ProtocolRevision::V1 => v1::Client.get_servers()?,
        ProtocolRevision::V2 => v2::Client.get_servers()?,
        ProtocolRevision::V3 => v3::Client.get_servers()?,
    };
    Ok(iter
        .filter_map(|r| match r {
            Ok(guid) => Some(guid),
            Err(e) => {
                tracing::warn!(error = ?e, "Class enumeration error, skipping");
                None
            }
        })
        .map(|guid| {
            // SAFETY: `opc_da`'s GUID and `windows::core::GUID` are the same
            // 128-bit layout (4-2-2-8 byte segments).
            unsafe { std::mem::transmute_copy::<_, GUID>(&guid) }
        })
        .filter(|guid| *guid != GUID::zeroed())
        .collect())
}

fn progid_to_clsid(progid: &str) -> OpcResult<GUID> {
    let wide: Vec<u16> = progid.encode_utf16().chain(std::iter::once(0)).collect();
    // SAFETY: `wide` is null-terminated and outlives the call.
    unsafe { CLSIDFromProgID(PCWSTR(wide.as_ptr())) }.map_err(|e| {
        tracing::error!(error = ?e, server = %progid, "ProgID resolution failed");
        OpcError::from(e)
    })
}

fn guid_to_progid(guid: &GUID) -> OpcResult<String> {
    // SAFETY: `ProgIDFromCLSID` returns a COM-allocated string, which
    // `take_string` converts and frees.
    let progid = unsafe { ProgIDFromCLSID(guid) }?;
    Ok(take_string(progid).unwrap_or_default())
}

/// Converts and frees a COM-allocated string. Null yields `None`.
fn take_string(value: PWSTR) -> Option<String> {
    Option::<String>::try_from(RemotePointer::from(value))
        .ok()
        .flatten()
}

#[allow(clippy::cast_sign_loss)]
const fn hresult_code(hr: HRESULT) -> u32 {
    hr.0 as u32
}

fn clear_variants(values: &mut [VARIANT]) {
    for value in values {
        // SAFETY: each VARIANT was initialized by the server and is cleared
        // exactly once.
        if let Err(e) = unsafe { VariantClear(value) } {
            tracing::debug!(error = ?e, "VariantClear failed");
        }
    }
}

/// # Safety
/// `status` must be null or a `GetStatus` result not yet freed.
unsafe fn free_status(status: *mut tagOPCSERVERSTATUS) {
    if status.is_null() {
        return;
    }
    // SAFETY: non-null per the check above; the vendor string and the
    // struct are separate COM allocations.
    unsafe {
        drop(take_string((*status).szVendorInfo));
        CoTaskMemFree(Some(status as *const _));
    }
}

fn take_element(element: &mut tagOPCBROWSEELEMENT) -> RemoteElement {
    RemoteElement {
        name: take_string(std::mem::replace(&mut element.szName, PWSTR::null()))
            .unwrap_or_default(),
        item_id: take_string(std::mem::replace(&mut element.szItemID, PWSTR::null()))
            .filter(|id| !id.is_empty()),
        has_children: element.dwFlagValue & OPC_BROWSE_HASCHILDREN != 0,
        is_item: element.dwFlagValue & OPC_BROWSE_ISITEM != 0,
        properties: take_item_properties(&mut element.ItemProperties),
    }
}

fn take_item_properties(props: &mut tagOPCITEMPROPERTIES) -> RemoteItemProperties {
    let list = std::mem::replace(&mut props.pItemProperties, std::ptr::null_mut());
    let count = usize::try_from(props.dwNumProperties).unwrap_or(0);
    props.dwNumProperties = 0;

    let mut parsed = Vec::new();
    if !list.is_null() {
        // SAFETY: the server allocated `count` contiguous entries at `list`;
        // each entry is consumed once and the block is freed afterwards.
        unsafe {
            let entries = std::slice::from_raw_parts_mut(list, count);
            parsed.extend(entries.iter_mut().map(take_property));
            CoTaskMemFree(Some(list as *const _));
        }
    }

    if props.hrErrorID.is_err() {
        Err(hresult_code(props.hrErrorID))
    } else {
        Ok(parsed)
    }
}

fn take_property(property: &mut tagOPCITEMPROPERTY) -> RemoteProperty {
    let failed = property.hrErrorID.is_err();
    let value = match variant_to_value(&property.vValue) {
        OpcValue::Empty => None,
        value => Some(value),
    };
    clear_variants(std::slice::from_mut(&mut property.vValue));

    RemoteProperty {
        id: property.dwPropertyID,
        description: take_string(std::mem::replace(&mut property.szDescription, PWSTR::null()))
            .unwrap_or_default(),
        data_type: property.vtDataType,
        item_id: take_string(std::mem::replace(&mut property.szItemID, PWSTR::null()))
            .filter(|id| !id.is_empty()),
        value: if failed { None } else { value },
        error: failed.then(|| hresult_code(property.hrErrorID)),
    }
}
