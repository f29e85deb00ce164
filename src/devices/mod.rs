//! Devices Module
//!
//! Block device directory backed by sysfs.

pub mod sysfs;

pub use sysfs::*;
