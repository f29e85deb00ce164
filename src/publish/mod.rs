//! Publication Module
//!
//! Object publisher and the publication event stream consumed by pending
//! requests.

pub mod events;
pub mod path;
pub mod registry;

pub use events::*;
pub use path::*;
pub use registry::*;
