//! Ports layer.
//!
//! Driven ports the wait set depends on. The in-process middleware in
//! `middleware/` is the adapter implementing them.

pub mod outbound;

pub use outbound::*;
