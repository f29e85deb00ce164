//! Domain Module
//!
//! Contains collaborator contracts and the shared domain types passed across
//! them.

pub mod ports;

pub use ports::*;
