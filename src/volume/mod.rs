//! Volume Module
//!
//! Volume group and logical volume model.

pub mod entity_table;
pub mod group;
pub mod names;

pub use entity_table::*;
pub use group::*;
pub use names::*;
