//! `VARIANT` decoding for property values.

use crate::errors::format_hresult;
use crate::typedefs::OpcValue;
use windows::Win32::System::Ole::{SafeArrayGetDim, SafeArrayGetLBound, SafeArrayGetUBound};
use windows::Win32::System::Variant::VARIANT;

const VT_ARRAY: u16 = 0x2000;
const VT_BYREF: u16 = 0x4000;

/// Decodes a server-produced `VARIANT`. Arrays only report their length.
#[allow(clippy::cast_possible_wrap)]
pub fn variant_to_value(variant: &VARIANT) -> OpcValue {
    // SAFETY: the VARIANT comes from a COM call, so `vt` names the active
    // union arm and every arm read below matches its `vt` case.
    unsafe {
        let vt = variant.Anonymous.Anonymous.vt.0;
        let data = &variant.Anonymous.Anonymous.Anonymous;

        if vt & VT_ARRAY != 0 {
            return array_value(data.parray);
        }
        if vt & VT_BYREF != 0 {
            return OpcValue::Other(format!("(VT 0x{vt:04X} by reference)"));
        }

        match vt {
            0 => OpcValue::Empty,                         // VT_EMPTY
            1 => OpcValue::Other("Null".into()),          // VT_NULL
            2 => OpcValue::Int(i64::from(data.iVal)),     // VT_I2
            3 | 22 => OpcValue::Int(i64::from(data.lVal)), // VT_I4, VT_INT
            4 => OpcValue::Float(f64::from(data.fltVal)), // VT_R4
            5 => OpcValue::Float(data.dblVal),            // VT_R8
            6 => OpcValue::Other(currency_text(data.cyVal.int64)), // VT_CY
            7 => ole_date(data.date),                     // VT_DATE
            8 => OpcValue::String(data.bstrVal.to_string()), // VT_BSTR
            10 => OpcValue::Other(format_hresult(data.scode as u32)), // VT_ERROR
            11 => OpcValue::Bool(data.boolVal.0 != 0),    // VT_BOOL
            16 => OpcValue::Int(i64::from(data.bVal as i8)), // VT_I1
            17 => OpcValue::Int(i64::from(data.bVal)),    // VT_UI1
            18 => OpcValue::Int(i64::from(data.uiVal)),   // VT_UI2
            19 | 23 => OpcValue::Int(i64::from(data.ulVal)), // VT_UI4, VT_UINT
            20 => OpcValue::Int(data.llVal),              // VT_I8
            21 => i64::try_from(data.ullVal)              // VT_UI8
                .map_or_else(|_| OpcValue::Other(data.ullVal.to_string()), OpcValue::Int),
            other => OpcValue::Other(format!("(VT {other})")),
        }
    }
}

/// # Safety
/// `parray` must be null or a valid `SAFEARRAY` pointer.
unsafe fn array_value(parray: *mut windows::Win32::System::Com::SAFEARRAY) -> OpcValue {
    if parray.is_null() {
        return OpcValue::Array(0);
    }
    // SAFETY: non-null and valid per this function's contract.
    let dims = unsafe { SafeArrayGetDim(parray) };
    if dims != 1 {
        return OpcValue::Other(format!("Array[{dims}D]"));
    }
    // SAFETY: one-dimensional array checked above; dimension 1 exists.
    let (lower, upper) = unsafe {
        (
            SafeArrayGetLBound(parray, 1).unwrap_or(0),
            SafeArrayGetUBound(parray, 1).unwrap_or(-1),
        )
    };
    OpcValue::Array(usize::try_from(upper - lower + 1).unwrap_or(0))
}

/// `CY` is a 64-bit integer scaled by 10 000.
fn currency_text(raw: i64) -> String {
    let sign = if raw < 0 { "-" } else { "" };
    let abs = raw.unsigned_abs();
    format!("{sign}{}.{:04}", abs / 10_000, abs % 10_000)
}

/// OLE Automation dates count days from 1899-12-30.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn ole_date(days: f64) -> OpcValue {
    const OLE_EPOCH_TO_UNIX_DAYS: f64 = 25_569.0;
    let millis = ((days - OLE_EPOCH_TO_UNIX_DAYS) * 86_400_000.0).round() as i64;
    chrono::DateTime::from_timestamp_millis(millis)
        .map_or_else(|| OpcValue::Other(format!("{days:.6}")), OpcValue::Date)
}
