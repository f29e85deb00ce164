//! Inventory Module
//!
//! Snapshot model and the helper-backed inventory source.

pub mod helper;
pub mod snapshot;

pub use helper::*;
pub use snapshot::*;
