//! Per-thread COM apartment membership.

use std::marker::PhantomData;
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

/// Joins the calling thread to the multi-threaded apartment for as long as
/// the guard lives.
///
/// The guard is `!Send` and `!Sync`: apartment membership belongs to a
/// thread, so it must be released on the thread that acquired it. The
/// browse worker holds one for its whole lifetime.
///
/// # Examples
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// let _com = opc_da_browse::ComGuard::new()?;
/// // COM calls on this thread are valid until `_com` drops.
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ComGuard {
    _thread_bound: PhantomData<*mut ()>,
}

impl ComGuard {
    /// `S_FALSE` (already a member of the MTA) counts as success and is
    /// balanced like any other successful call.
    ///
    /// # Errors
    ///
    /// Fails when `CoInitializeEx` returns an error HRESULT, for instance
    /// when the thread already lives in a single-threaded apartment.
    pub fn new() -> anyhow::Result<Self> {
        // SAFETY: plain FFI call with no pointer arguments. Success is
        // checked before the guard exists, so `Drop` only ever balances a
        // successful initialization.
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if let Err(e) = hr.ok() {
            tracing::error!(error = ?e, "COM MTA initialization failed");
            anyhow::bail!("CoInitializeEx failed: {e}");
        }
        tracing::debug!("Joined COM MTA");
        Ok(Self {
            _thread_bound: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        tracing::debug!("Leaving COM MTA");
        // SAFETY: the guard exists only after a successful `CoInitializeEx`
        // on this thread, and `!Send` keeps the drop on that same thread.
        unsafe {
            CoUninitialize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_can_be_nested() {
        let outer = ComGuard::new().unwrap();
        let inner = ComGuard::new().unwrap();
        drop(inner);
        drop(outer);
    }
}
