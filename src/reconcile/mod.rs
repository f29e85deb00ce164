//! Reconcile Module
//!
//! Snapshot reconciliation, move progress attribution and block association.

pub mod block_sync;
pub mod progress;
pub mod reconciler;

pub use block_sync::*;
pub use progress::*;
pub use reconciler::*;
