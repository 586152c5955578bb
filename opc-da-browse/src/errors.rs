use crate::typedefs::ProtocolRevision;
use thiserror::Error;

/// Result type alias for OPC DA operations.
pub type OpcResult<T> = Result<T, OpcError>;

/// Generic failure (`E_FAIL`). Returned by `ChangeBrowsePosition(UP)` at the root.
pub const E_FAIL: u32 = 0x8000_4005;
/// Invalid argument (`E_INVALIDARG`).
pub const E_INVALIDARG: u32 = 0x8007_0057;
/// Interface not implemented (`E_NOTIMPL`).
pub const E_NOTIMPL: u32 = 0x8000_4001;

/// HRESULTs that mean the remote object is gone rather than unwilling.
const TRANSPORT_CODES: [u32; 6] = [
    0x8007_06BA, // RPC_S_SERVER_UNAVAILABLE
    0x8007_06BE, // RPC_S_CALL_FAILED
    0x8007_06BF, // RPC_S_CALL_FAILED_DNE
    0x8008_0005, // CO_E_SERVER_EXEC_FAILURE
    0x8001_0108, // RPC_E_DISCONNECTED
    0x8001_0114, // RPC_E_SERVER_DIED_DNE
];

/// Centralized error enum for the OPC DA browser.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpcError {
    /// The remote server is unreachable or the connection dropped.
    #[error("Transport failure: {message} ({})", hresult_text(.code))]
    Transport { code: u32, message: String },

    /// The server understood the call and rejected it with an HRESULT.
    #[error("Server rejected request: {message} ({})", hresult_text(.code))]
    Protocol { code: u32, message: String },

    /// An identifier could not be resolved by any strategy.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server lacks a protocol revision or interface the call needs.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Every attempted protocol revision failed.
    #[error("All protocol revisions failed: {}", summarize(.0))]
    Aggregate(Vec<RevisionFailure>),

    /// Operation attempted in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Catch-all for unexpected internal failures.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One revision's failure inside [`OpcError::Aggregate`].
#[derive(Debug)]
pub struct RevisionFailure {
    pub revision: ProtocolRevision,
    pub error: OpcError,
}

fn hresult_text(code: &u32) -> String {
    format_hresult(*code)
}

fn summarize(failures: &[RevisionFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.revision, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl OpcError {
    /// Classifies a failed HRESULT as a transport or protocol fault.
    pub fn from_hresult(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        if TRANSPORT_CODES.contains(&code) {
            Self::Transport { code, message }
        } else {
            Self::Protocol { code, message }
        }
    }

    /// The HRESULT carried by a transport or protocol fault.
    pub const fn code(&self) -> Option<u32> {
        match self {
            Self::Transport { code, .. } | Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `true` when the connection itself is suspect and should be re-established.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// `true` for a server-side rejection that callers may treat as control flow.
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

impl From<anyhow::Error> for OpcError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for OpcError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Async task join failed: {err}"))
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for OpcError {
    #[allow(clippy::cast_sign_loss)]
    fn from(err: windows::core::Error) -> Self {
        Self::from_hresult(err.code().0 as u32, err.message())
    }
}

/// Helper to format HRESULT with friendly hints.
pub fn format_hresult(code: u32) -> String {
    let hex = format!("0x{code:08X}");
    match friendly_hresult_hint(code) {
        Some(hint) => format!("{hex}: {hint}"),
        None => hex,
    }
}

/// Maps known COM/DCOM error codes to actionable user hints.
///
/// # Examples
/// ```
/// use opc_da_browse::friendly_hresult_hint;
///
/// assert_eq!(
///     friendly_hresult_hint(0x8004_0154),
///     Some("Server is not registered on this machine"),
/// );
/// assert_eq!(friendly_hresult_hint(0x1234_5678), None);
/// ```
pub fn friendly_hresult_hint(code: u32) -> Option<&'static str> {
    match code {
        0x80040112 => Some("Server license does not permit OPC client connections"),
        0x80080005 => Some("Server process failed to start — check if it is installed and running"),
        0x80070005 => {
            Some("Access denied — DCOM launch/activation permissions not configured for this user")
        }
        0x800706BA => {
            Some("RPC server unavailable — the target host may be offline or blocking RPC")
        }
        0x80010108 => Some("Server object disconnected — the OPC server may have shut down"),
        0x800706F4 => Some("COM marshalling error — try restarting the OPC server"),
        0x80040154 => Some("Server is not registered on this machine"),
        0x80004001 => Some("Interface not implemented by this server (E_NOTIMPL)"),
        0x80004005 => Some("Unspecified failure (E_FAIL) — e.g. cannot browse above the root"),
        0x80070057 => Some("Invalid argument (E_INVALIDARG) — branch or item name not accepted"),
        0xC0040007 => Some("Item ID not found in server address space (OPC_E_UNKNOWNITEMID)"),
        0xC0040008 => Some("Item ID syntax is invalid for this server (OPC_E_INVALIDITEMID)"),
        0xC0040203 => Some("Property ID is not valid for this item (OPC_E_INVALID_PID)"),
        0xC0040209 => Some("Continuation point is no longer valid (OPC_E_INVALIDCONTINUATIONPOINT)"),
        _ => None,
    }
}

/// Maps an [`OpcError`] to a friendly COM hint if it carries an HRESULT.
pub fn friendly_com_hint(error: &OpcError) -> Option<&'static str> {
    error.code().and_then(friendly_hresult_hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hresult_classifies_rpc_codes_as_transport() {
        let err = OpcError::from_hresult(0x8007_06BA, "ChangeBrowsePosition");
        assert!(err.is_transport());
        let err = OpcError::from_hresult(0x8001_0108, "BrowseOPCItemIDs");
        assert!(err.is_transport());
    }

    #[test]
    fn test_from_hresult_classifies_other_codes_as_protocol() {
        let err = OpcError::from_hresult(E_FAIL, "ChangeBrowsePosition");
        assert!(err.is_protocol());
        assert_eq!(err.code(), Some(E_FAIL));
    }

    #[test]
    fn test_display_includes_hint() {
        let err = OpcError::from_hresult(0xC004_0007, "GetItemID");
        let text = err.to_string();
        assert!(text.contains("0xC0040007"), "{text}");
        assert!(text.contains("OPC_E_UNKNOWNITEMID"), "{text}");
    }

    #[test]
    fn test_aggregate_lists_every_revision() {
        let err = OpcError::Aggregate(vec![
            RevisionFailure {
                revision: ProtocolRevision::V3,
                error: OpcError::Unsupported("IOPCBrowse not supported".into()),
            },
            RevisionFailure {
                revision: ProtocolRevision::V2,
                error: OpcError::NotFound("Tag1".into()),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("[DA 3.0] Unsupported"), "{text}");
        assert!(text.contains("[DA 2.05] Not found: Tag1"), "{text}");
    }

    #[test]
    fn test_friendly_com_hint_only_for_coded_errors() {
        let err = OpcError::from_hresult(0x8004_0154, "CoCreateInstance");
        assert_eq!(
            friendly_com_hint(&err),
            Some("Server is not registered on this machine")
        );
        assert_eq!(friendly_com_hint(&OpcError::Internal("x".into())), None);
    }

    #[test]
    fn test_format_hresult_unknown_code() {
        assert_eq!(format_hresult(0x1234_5678), "0x12345678");
    }
}
