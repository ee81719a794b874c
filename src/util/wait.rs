use std::time::Duration;

/// Wait budget for polling loops: spin, then yield, then (optionally) sleep.
///
/// The turn token uses [`WaitBudget::spin`] so a waiting participant never
/// hands its processor back to the scheduler while polling.
#[derive(Copy, Clone, Debug)]
pub struct WaitBudget {
    spins: u32,
    yields: u32,
    spin_cap: u32,
    yield_cap: u32,
    nap: Option<Duration>,
}

impl WaitBudget {
    /// Pure busy spin; every step is a `spin_loop` hint.
    #[inline]
    pub const fn spin() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 0,
            yield_cap: 0,
            nap: None,
        }
    }

    /// Bounded spin then yield; never parks.
    #[inline]
    pub const fn hot() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 128,
            yield_cap: 8,
            nap: None,
        }
    }

    /// Short spin, a run of yields, then short sleeps. For waits on another
    /// process where latency is not measured.
    #[inline]
    pub const fn idle() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 10,
            yield_cap: 100,
            nap: Some(Duration::from_micros(50)),
        }
    }

    /// Reset the wait budget counters.
    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
    }

    /// Perform one step of the wait strategy.
    #[inline]
    pub fn step(&mut self) {
        if self.spins < self.spin_cap {
            core::hint::spin_loop();
            self.spins += 1;
        } else if self.yields < self.yield_cap {
            std::thread::yield_now();
            self.yields += 1;
        } else if let Some(nap) = self.nap {
            std::thread::sleep(nap);
        } else {
            // Stay hot without parking to avoid scheduler-induced latency.
            core::hint::spin_loop();
        }
    }

    /// Whether this budget ever gives the processor away.
    #[inline]
    pub fn yields(&self) -> bool {
        self.yield_cap > 0 || self.nap.is_some()
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self::spin()
    }
}
