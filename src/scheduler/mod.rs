//! Scheduler Module
//!
//! Per-group poll scheduling.

pub mod poll;

pub use poll::*;
