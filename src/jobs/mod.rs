//! Jobs Module
//!
//! Out-of-process job execution and the completion bridge that answers the
//! callers waiting on those jobs.

pub mod bridge;
pub mod command;
pub mod launcher;
pub mod table;

pub use bridge::*;
pub use command::*;
pub use launcher::*;
pub use table::*;
