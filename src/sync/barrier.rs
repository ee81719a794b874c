//! RendezvousBarrier: blocks `n` participants until all `n` have arrived.
//!
//! Arrival counter plus generation marker behind a mutex, with a condvar the
//! early arrivals sleep on. The last arrival bumps the generation and wakes
//! everyone; waiters compare generations, so spurious wakeups never release
//! anybody early. There is no timeout: a missing arrival blocks all callers
//! forever.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct State {
    arrived: usize,
    generation: u64,
}

/// One-shot rendezvous point for a fixed number of participants.
pub struct RendezvousBarrier {
    state: Mutex<State>,
    cvar: Condvar,
    expected: usize,
}

/// Returned from [`RendezvousBarrier::arrive_and_wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrival {
    leader: bool,
    generation: u64,
}

impl Arrival {
    /// Whether this caller was the last to arrive. Exactly one per cycle.
    #[inline]
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Cycle this arrival belonged to, starting at 0.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl RendezvousBarrier {
    /// Barrier that releases once `expected_count` callers have arrived.
    ///
    /// # Panics
    /// If `expected_count` is zero.
    pub fn new(expected_count: usize) -> Self {
        assert!(expected_count > 0, "RendezvousBarrier needs at least one participant");
        Self {
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
            }),
            cvar: Condvar::new(),
            expected: expected_count,
        }
    }

    /// Number of arrivals a cycle waits for.
    #[inline]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Register an arrival and block until the cycle is complete.
    pub fn arrive_and_wait(&self) -> Arrival {
        let mut state = self.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.expected {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            self.cvar.notify_all();
            tracing::trace!(generation, "rendezvous released");
            return Arrival {
                leader: true,
                generation,
            };
        }
        while state.generation == generation {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Arrival {
            leader: false,
            generation,
        }
    }

    /// Arrivals registered in the current cycle.
    pub fn arrived(&self) -> usize {
        self.lock().arrived
    }

    /// Forget a partial cycle. `&mut self` guarantees nobody is blocked.
    pub fn reset(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.arrived = 0;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn single_participant_passes_straight_through() {
        let b = RendezvousBarrier::new(1);
        let a = b.arrive_and_wait();
        assert!(a.is_leader());
        assert_eq!(a.generation(), 0);
        assert_eq!(b.arrive_and_wait().generation(), 1);
    }

    #[test]
    fn nobody_returns_before_the_last_arrival() {
        const N: usize = 8;
        let barrier = RendezvousBarrier::new(N);
        let arrivals = AtomicUsize::new(0);
        let leaders = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..N {
                s.spawn(|| {
                    arrivals.fetch_add(1, Ordering::SeqCst);
                    let a = barrier.arrive_and_wait();
                    assert_eq!(arrivals.load(Ordering::SeqCst), N);
                    if a.is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.arrived(), 0);
    }

    #[test]
    fn reset_drops_a_partial_cycle() {
        let mut b = RendezvousBarrier::new(2);
        thread::scope(|s| {
            s.spawn(|| b.arrive_and_wait());
            b.arrive_and_wait();
        });
        assert_eq!(b.arrived(), 0);
        b.reset();
        assert_eq!(b.expected(), 2);
    }

    #[test]
    #[should_panic(expected = "at least one participant")]
    fn zero_participants_is_rejected() {
        let _ = RendezvousBarrier::new(0);
    }
}
