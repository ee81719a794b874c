//! Thread teams: N worker threads reporting through one spin token.
//!
//! Three launch modes differ only in how the token's first turn becomes
//! visible to the workers:
//! - `Pool`: published before any worker exists.
//! - `Rendezvous`: published by the initializer after it and every worker
//!   have met at a [`RendezvousBarrier`] of N+1 arrivals.
//! - `Unsynchronized`: published by the initializer right after spawning,
//!   with no synchronization; which workers are already polling at that
//!   moment depends on scheduling.

use std::thread;

use crate::Participant;
use crate::binding::{BindingQuery, BindingReport, CpuList};
use crate::error::{ConfigError, Result};
use crate::ordered::{OrderedExecutionBarrier, ReportSink, Sequencer, Solo};
use crate::sync::{RendezvousBarrier, SpinToken};
use crate::util::WaitBudget;

/// How the first turn is published to the workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Launch {
    /// Shared counter initialized before the workers start.
    #[default]
    Pool,
    /// Initializer and workers rendezvous, then the initializer publishes.
    Rendezvous,
    /// Initializer publishes right after spawning; timing-dependent.
    Unsynchronized,
}

/// Spin token plus the optional rendezvous guarding its publication.
pub struct TeamToken {
    token: SpinToken,
    rendezvous: Option<RendezvousBarrier>,
    launch: Launch,
}

impl TeamToken {
    /// Token for `participants` workers launched with `launch`.
    pub fn new(participants: usize, launch: Launch, budget: WaitBudget) -> Result<Self> {
        let order: Vec<Participant> = (0..participants).collect();
        let token = match launch {
            Launch::Pool => SpinToken::init(order),
            Launch::Rendezvous | Launch::Unsynchronized => SpinToken::unpublished(order),
        }
        .map_err(ConfigError::from)?
        .with_wait(budget);
        let rendezvous =
            (launch == Launch::Rendezvous).then(|| RendezvousBarrier::new(participants + 1));
        Ok(Self {
            token,
            rendezvous,
            launch,
        })
    }

    /// The underlying spin token.
    pub fn token(&self) -> &SpinToken {
        &self.token
    }

    /// Initializer side: make the first turn visible according to the launch.
    pub fn start(&self) {
        match self.launch {
            Launch::Pool => {}
            Launch::Rendezvous => {
                if let Some(r) = &self.rendezvous {
                    r.arrive_and_wait();
                }
                self.token.publish();
            }
            Launch::Unsynchronized => {
                self.token.publish();
            }
        }
        tracing::debug!(launch = ?self.launch, "first turn published");
    }
}

impl Sequencer for TeamToken {
    fn wait_for_turn(&self, me: Participant) -> Result<()> {
        if let Some(r) = &self.rendezvous {
            r.arrive_and_wait();
        }
        Sequencer::wait_for_turn(&self.token, me)
    }

    #[inline]
    fn hand_off(&self, me: Participant) -> Result<()> {
        Sequencer::hand_off(&self.token, me)
    }
}

/// A fixed-size team of worker threads that report in index order.
#[derive(Clone, Debug)]
pub struct ThreadTeam {
    threads: usize,
    launch: Launch,
    pin: Option<CpuList>,
    budget: WaitBudget,
}

impl ThreadTeam {
    /// Team of `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self, ConfigError> {
        if threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        Ok(Self {
            threads,
            launch: Launch::default(),
            pin: None,
            budget: WaitBudget::spin(),
        })
    }

    /// Choose the launch mode.
    pub fn launch(mut self, launch: Launch) -> Self {
        self.launch = launch;
        self
    }

    /// Pin worker `k` to `cpus.for_participant(k)`.
    pub fn pin(mut self, cpus: Option<CpuList>) -> Self {
        self.pin = cpus;
        self
    }

    /// Replace the pure-spin wait used while a worker is not on turn.
    pub fn wait(mut self, budget: WaitBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Number of workers.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run the team; result `k` belongs to worker `k`.
    ///
    /// A single-worker team reports on the calling thread without any token.
    pub fn run<Q, W>(&self, query: Q, sink: W) -> Result<Vec<Result<BindingReport>>>
    where
        Q: BindingQuery,
        W: ReportSink,
    {
        tracing::info!(threads = self.threads, launch = ?self.launch, "starting thread team");
        if self.threads == 1 {
            let solo = OrderedExecutionBarrier::new(Solo, query, sink).with_pin(self.pin.clone());
            return Ok(vec![solo.enter(0)]);
        }

        let token = TeamToken::new(self.threads, self.launch, self.budget)?;
        let barrier = OrderedExecutionBarrier::new(token, query, sink).with_pin(self.pin.clone());
        let results = thread::scope(|s| {
            let handles: Vec<_> = (0..self.threads)
                .map(|me| {
                    let barrier = &barrier;
                    s.spawn(move || barrier.enter(me))
                })
                .collect();
            barrier.sequencer().start();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect::<Vec<_>>()
        });
        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(threads = self.threads, failed, "thread team finished");
        Ok(results)
    }
}

/// Worker count when none is configured.
pub fn default_thread_count() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}
