//! Manager Module
//!
//! The event loop that owns volume group state, plus its configuration,
//! collaborator context and request handle.

pub mod config;
pub mod context;
pub mod event_loop;
pub mod handle;

pub use config::*;
pub use context::*;
pub use event_loop::*;
pub use handle::*;
