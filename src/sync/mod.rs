//! Shared-memory ordering primitives for thread teams.

/// Rendezvous barrier for race-free token publication.
pub mod barrier;
/// Spin-polled shared-memory turn token.
pub mod token;

pub use barrier::{Arrival, RendezvousBarrier};
pub use token::{SpinToken, TurnState};
