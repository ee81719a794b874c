//! Message-passing token ring across ranks that share no memory.
//!
//! Rank 0 reports at once and sends the token `1` to rank 1; every other
//! rank `r` blocks on a receive matched on sender `r - 1`, reports, and
//! forwards `r + 1` unless it is last. Receives suspend the rank, nothing
//! spins. There is no timeout: a rank that never forwards leaves its
//! successor blocked.

use crate::Participant;
use crate::binding::{BindingQuery, BindingReport, CpuList};
use crate::error::{ConfigError, Result, TransportError};
use crate::ordered::{OrderedExecutionBarrier, ReportSink, Sequencer};

/// Wire framing of a token message.
pub mod frame;
/// Process launcher for `cpubind ranks`.
pub mod launch;
/// In-process channel mesh; ranks are threads.
pub mod local;
/// Unix-domain socket transport; ranks are processes.
#[cfg(unix)]
pub mod socket;

pub use frame::Frame;
pub use local::{LocalEndpoint, mesh};
#[cfg(unix)]
pub use socket::SocketTransport;

/// Token payload: the identity of the rank it is addressed to.
pub type Token = u64;

/// Point-to-point channel between the ranks of one run.
///
/// Delivery must be FIFO per (sender, receiver) pair, and `recv_from` must
/// only ever return a message that `from` sent to this rank.
pub trait Transport {
    /// This endpoint's rank.
    fn rank(&self) -> Participant;
    /// Number of ranks in the run.
    fn world_size(&self) -> usize;
    /// Send `token` to rank `to`.
    fn send(&self, to: Participant, token: Token) -> Result<(), TransportError>;
    /// Block until a token from rank `from` arrives.
    fn recv_from(&self, from: Participant) -> Result<Token, TransportError>;
}

/// Sequencer that moves the turn by passing a token along the ranks.
pub struct TokenRing<T> {
    transport: T,
}

impl<T: Transport> TokenRing<T> {
    /// Ring over `transport`.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Sequencer for TokenRing<T> {
    fn wait_for_turn(&self, me: Participant) -> Result<()> {
        if me == 0 {
            return Ok(());
        }
        let token = self.transport.recv_from(me - 1)?;
        tracing::debug!(rank = me, from = me - 1, token, "token received");
        Ok(())
    }

    fn hand_off(&self, me: Participant) -> Result<()> {
        let next = me + 1;
        if next < self.transport.world_size() {
            self.transport.send(next, next as Token)?;
            tracing::debug!(rank = me, to = next, "token forwarded");
        }
        Ok(())
    }
}

/// Run this endpoint's rank: wait for the token, report, forward.
pub fn run_rank<T, Q, W>(transport: T, query: Q, sink: W, pin: Option<CpuList>) -> Result<BindingReport>
where
    T: Transport,
    Q: BindingQuery,
    W: ReportSink,
{
    let (rank, world_size) = (transport.rank(), transport.world_size());
    if world_size == 0 {
        return Err(ConfigError::ZeroWorld.into());
    }
    if rank >= world_size {
        return Err(ConfigError::RankOutOfWorld { rank, world_size }.into());
    }
    tracing::info!(rank, world_size, "rank starting");
    OrderedExecutionBarrier::new(TokenRing::new(transport), query, sink)
        .with_pin(pin)
        .enter(rank)
}
