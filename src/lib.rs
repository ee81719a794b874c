#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]

//! Ordered processor-binding reports: every participant of a concurrent run
//! (a thread of a team, or a rank process) queries which processors it may
//! run on and reports it, strictly one after another in participant order.
//!
//! Ordering is a token handoff: a spin-polled shared turn counter for
//! threads (optionally published behind a rendezvous barrier), or a token
//! message passed point-to-point between ranks. The affinity query itself
//! knows nothing about ordering.

pub mod affinity;
pub mod binding;
pub mod config;
pub mod error;
pub mod ordered;
pub mod rank;
pub mod sync;
pub mod team;
pub mod util;

/// Ordinal identity of a worker within a run, `0..n`.
pub type Participant = usize;

pub use binding::{BindingQuery, BindingReport, CpuList, ThreadBinding};
pub use error::{ConfigError, Error, OrderError, QueryError, Result, TransportError};
pub use ordered::{
    MemorySink, OrderedExecutionBarrier, ReportFormat, ReportSink, Sequencer, Solo, WriterSink,
};
pub use rank::{TokenRing, Transport, run_rank};
pub use sync::{RendezvousBarrier, SpinToken, TurnState};
pub use team::{Launch, ThreadTeam};

/// Convenience imports.
pub mod prelude {
    pub use crate::Participant;
    pub use crate::binding::{BindingQuery, BindingReport, CpuList, ThreadBinding};
    pub use crate::error::{Error, QueryError};
    pub use crate::ordered::{
        MemorySink, OrderedExecutionBarrier, ReportFormat, ReportSink, Sequencer, Solo,
        WriterSink,
    };
    pub use crate::rank::{TokenRing, Transport, mesh, run_rank};
    pub use crate::sync::{RendezvousBarrier, SpinToken, TurnState};
    pub use crate::team::{Launch, ThreadTeam};
    pub use crate::util::WaitBudget;
}
