//! Binding reports: the processor set a worker is allowed to run on, and the
//! query seam that produces them.

use core::fmt;
use core::str::FromStr;

use smallvec::SmallVec;

use crate::error::{ConfigError, QueryError};

/// Size of the report buffer a rendered mask must fit, terminator included.
pub const MASK_BUFFER_LEN: usize = 64;

/// Immutable processor set of one worker at the moment of the query.
///
/// Stored as little-endian 64-bit mask words (bit `k` of word `w` is CPU
/// `64 * w + k`) with trailing zero words trimmed, so equal sets compare equal
/// regardless of the buffer size the kernel was asked with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BindingReport {
    words: SmallVec<[u64; 4]>,
}

impl BindingReport {
    /// Build from raw mask words as returned by the affinity syscall.
    pub fn from_words(words: impl IntoIterator<Item = u64>) -> Self {
        let mut words: SmallVec<[u64; 4]> = words.into_iter().collect();
        while words.last() == Some(&0) {
            words.pop();
        }
        Self { words }
    }

    /// Build from CPU indices.
    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>) -> Self {
        let mut words: SmallVec<[u64; 4]> = SmallVec::new();
        for cpu in cpus {
            let (w, bit) = (cpu / 64, cpu % 64);
            if words.len() <= w {
                words.resize(w + 1, 0);
            }
            words[w] |= 1u64 << bit;
        }
        Self::from_words(words)
    }

    /// Whether `cpu` is in the set.
    #[inline]
    pub fn contains(&self, cpu: usize) -> bool {
        self.words
            .get(cpu / 64)
            .is_some_and(|w| w & (1u64 << (cpu % 64)) != 0)
    }

    /// Number of CPUs in the set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// CPU indices in ascending order.
    pub fn cpus(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64)
                .filter(move |k| bits & (1u64 << k) != 0)
                .map(move |k| w * 64 + k)
        })
    }

    /// Raw mask words, lowest CPUs first.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Mask rendering bounded by [`MASK_BUFFER_LEN`].
    pub fn to_mask(&self) -> Result<String, QueryError> {
        self.to_mask_within(MASK_BUFFER_LEN)
    }

    /// Mask rendering into a buffer of `capacity` bytes (terminator included).
    pub fn to_mask_within(&self, capacity: usize) -> Result<String, QueryError> {
        let rendered = self.to_string();
        let needed = rendered.len() + 1;
        if needed > capacity {
            return Err(QueryError::FormatFailed { needed, capacity });
        }
        Ok(rendered)
    }

    /// Range-list rendering, e.g. `0-3,8`.
    pub fn to_list(&self) -> String {
        let mut out = String::new();
        let mut cpus = self.cpus().peekable();
        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.peek() == Some(&(end + 1)) {
                end += 1;
                cpus.next();
            }
            if !out.is_empty() {
                out.push(',');
            }
            if start == end {
                out.push_str(&start.to_string());
            } else {
                out.push_str(&format!("{start}-{end}"));
            }
        }
        out
    }

    fn word32(&self, i: usize) -> u32 {
        let w = self.words.get(i / 2).copied().unwrap_or(0);
        (w >> (32 * (i % 2))) as u32
    }
}

/// Bitmap style: highest non-zero 32-bit word first, comma separated.
impl fmt::Display for BindingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n32 = self.words.len() * 2;
        let Some(top) = (0..n32).rev().find(|&i| self.word32(i) != 0) else {
            return f.write_str("0x0");
        };
        write!(f, "0x{:08x}", self.word32(top))?;
        for i in (0..top).rev() {
            write!(f, ",0x{:08x}", self.word32(i))?;
        }
        Ok(())
    }
}

/// The affinity query a participant runs inside its ordered section.
///
/// Implementations carry no ordering semantics of their own.
pub trait BindingQuery: Sync {
    /// Processor binding of the calling thread.
    fn query_local_binding(&self) -> Result<BindingReport, QueryError>;
}

impl<F> BindingQuery for F
where
    F: Fn() -> Result<BindingReport, QueryError> + Sync,
{
    #[inline]
    fn query_local_binding(&self) -> Result<BindingReport, QueryError> {
        self()
    }
}

/// The operating system's view of the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadBinding;

impl BindingQuery for ThreadBinding {
    fn query_local_binding(&self) -> Result<BindingReport, QueryError> {
        crate::affinity::current_thread_binding()
    }
}

/// Exclusive upper bound on CPU ids, and on the length of a [`CpuList`].
pub const MAX_CPUS: usize = 1 << 20;

/// Ordered CPU list, e.g. `3,0-2` (= 3, 0, 1, 2).
///
/// Order is kept so that round-robin assignment follows what the user wrote.
/// Ids at or above [`MAX_CPUS`], and lists longer than it, are rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuList(Vec<usize>);

impl CpuList {
    /// CPU assigned to participant `k` (round-robin).
    #[inline]
    pub fn for_participant(&self, k: usize) -> usize {
        self.0[k % self.0.len()]
    }

    /// Entries in list order.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Largest entry.
    pub fn max(&self) -> usize {
        self.0.iter().copied().max().unwrap_or(0)
    }
}

impl FromStr for CpuList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::CpuList(s.to_string());
        let mut cpus = Vec::new();
        for part in s.trim().split(',') {
            let part = part.trim();
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.trim().parse().map_err(|_| bad())?;
                    let hi: usize = hi.trim().parse().map_err(|_| bad())?;
                    if lo > hi || hi >= MAX_CPUS || cpus.len() + (hi - lo) >= MAX_CPUS {
                        return Err(bad());
                    }
                    cpus.extend(lo..=hi);
                }
                None => {
                    let cpu: usize = part.parse().map_err(|_| bad())?;
                    if cpu >= MAX_CPUS || cpus.len() >= MAX_CPUS {
                        return Err(bad());
                    }
                    cpus.push(cpu);
                }
            }
        }
        if cpus.is_empty() {
            return Err(bad());
        }
        Ok(CpuList(cpus))
    }
}
