//! Backend implementations for OPC DA communication.
//!
//! The client is generic over its connector. The COM connector is gated
//! behind the `opc-da-backend` feature and only exists on Windows.

pub mod client;

#[cfg(all(windows, feature = "opc-da-backend"))]
pub mod com;

#[cfg(all(windows, feature = "opc-da-backend"))]
mod variant;
