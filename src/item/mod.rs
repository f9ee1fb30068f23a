#[cfg(feature = "csv")]
/// This module provides the CSV record source.
pub mod csv;

#[cfg(feature = "xml")]
/// This module provides the streaming XML record source.
pub mod xml;

#[cfg(feature = "memory")]
/// This module provides an in-memory entity store and manager.
pub mod memory;
