//! Export of collected draws and diagnostics.

#[cfg(feature = "csv")]
pub mod csv;
