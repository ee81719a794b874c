//! Small helpers shared across the crate.

/// Wait budget utilities for spin-wait loops.
pub mod wait;

pub use wait::WaitBudget;
