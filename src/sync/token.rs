//! Shared-memory turn token.
//! - One cacheline-padded atomic turn counter holding a *position* in the
//!   participant order; participants map themselves to their position once.
//! - Waiters poll with relaxed loads and take an acquire fence on success;
//!   the turn holder hands off with a release increment.
//! - No lock: only the current turn holder ever writes the counter, and that
//!   discipline is the caller's.

use core::sync::atomic::{AtomicUsize, Ordering, fence};

use crate::Participant;
use crate::error::OrderError;
use crate::util::WaitBudget;

const CACHELINE: usize = 64;

/// Turn value before the initializer publishes; matches no position.
const UNPUBLISHED: usize = usize::MAX;

#[repr(align(64))]
#[allow(dead_code)] // Cache padding is not used
struct Pad([u8; CACHELINE]);

#[repr(C)]
struct Padded<T> {
    val: T,
    _pad: Pad,
}

/// Where the token currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    /// Created unpublished and not yet published.
    Unpublished,
    /// It is this participant's turn.
    Holder(Participant),
    /// Every participant has had its turn.
    Finished,
}

/// Spin-polled sequence token over a fixed participant order.
pub struct SpinToken {
    turn: Padded<AtomicUsize>,
    order: Box<[Participant]>,
    position: Box<[usize]>,
    budget: WaitBudget,
}

impl SpinToken {
    /// Token over `order`, published: `order[0]` holds the first turn.
    pub fn init(order: impl Into<Vec<Participant>>) -> Result<Self, OrderError> {
        Self::build(order.into(), 0)
    }

    /// Token over `0..n` in ascending order, published.
    pub fn ascending(n: usize) -> Result<Self, OrderError> {
        Self::init((0..n).collect::<Vec<_>>())
    }

    /// Token over `order` that nobody holds until [`publish`](Self::publish).
    pub fn unpublished(order: impl Into<Vec<Participant>>) -> Result<Self, OrderError> {
        Self::build(order.into(), UNPUBLISHED)
    }

    /// Replace the wait strategy (default: pure spin).
    ///
    /// A yielding budget changes what the run measures: a participant that
    /// yields while waiting may be migrated by the scheduler.
    pub fn with_wait(mut self, budget: WaitBudget) -> Self {
        self.budget = budget;
        self
    }

    fn build(order: Vec<Participant>, initial: usize) -> Result<Self, OrderError> {
        if order.is_empty() {
            return Err(OrderError::Empty);
        }
        let len = order.len();
        let mut position = vec![usize::MAX; len];
        for (pos, &p) in order.iter().enumerate() {
            if p >= len {
                return Err(OrderError::OutOfRange { participant: p, len });
            }
            if position[p] != usize::MAX {
                return Err(OrderError::Duplicate(p));
            }
            position[p] = pos;
        }
        Ok(Self {
            turn: Padded {
                val: AtomicUsize::new(initial),
                _pad: Pad([0; CACHELINE]),
            },
            order: order.into_boxed_slice(),
            position: position.into_boxed_slice(),
            budget: WaitBudget::spin(),
        })
    }

    /// Number of participants.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false; orders are never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The participant order.
    pub fn order(&self) -> &[Participant] {
        &self.order
    }

    /// Publish the first turn with a single release store.
    ///
    /// Returns false if the token was already published; a second publish
    /// never rewinds a run in progress.
    pub fn publish(&self) -> bool {
        self.turn
            .val
            .compare_exchange(UNPUBLISHED, 0, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Snapshot of the turn.
    pub fn state(&self) -> TurnState {
        match self.turn.val.load(Ordering::Acquire) {
            UNPUBLISHED => TurnState::Unpublished,
            pos if pos < self.order.len() => TurnState::Holder(self.order[pos]),
            _ => TurnState::Finished,
        }
    }

    /// Busy-poll until it is `me`'s turn. Never yields with the default budget.
    pub fn wait_for_turn(&self, me: Participant) -> Result<(), OrderError> {
        let pos = *self.position.get(me).ok_or(OrderError::OutOfRange {
            participant: me,
            len: self.order.len(),
        })?;
        let mut budget = self.budget;
        while self.turn.val.load(Ordering::Relaxed) != pos {
            budget.step();
        }
        // Pair with the previous holder's release so its writes are visible.
        fence(Ordering::Acquire);
        Ok(())
    }

    /// Hand the turn to the next participant in order.
    ///
    /// Must be called exactly once by the current holder; a second call skips
    /// the next participant for good. Returns the new holder, if any.
    /// Does nothing on an unpublished or finished token.
    pub fn advance(&self) -> Option<Participant> {
        let len = self.order.len();
        let prev = self
            .turn
            .val
            .fetch_update(Ordering::Release, Ordering::Relaxed, |pos| {
                (pos < len).then_some(pos + 1)
            })
            .ok()?;
        self.order.get(prev + 1).copied()
    }
}
