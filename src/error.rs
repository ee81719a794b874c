//! Error taxonomy: binding queries, participant orders, token transports and
//! run configuration.

use std::io;

use thiserror::Error;

use crate::Participant;

/// Failure of the processor-binding query on the calling worker.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The processor count of the machine could not be determined.
    #[error("topology init failed: {0}")]
    InitFailed(#[source] io::Error),
    /// The set of possible processors could not be loaded.
    #[error("topology load failed: {0}")]
    LoadFailed(String),
    /// The affinity mask buffer could not be allocated.
    #[error("cpuset allocation of {words} words failed")]
    AllocFailed {
        /// Requested mask length in 64-bit words.
        words: usize,
    },
    /// The operating system rejected the affinity query (or pin request).
    #[error("{operation} failed: {source}")]
    QueryFailed {
        /// Name of the failing system call.
        operation: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The rendered set does not fit the report buffer.
    #[error("binding set needs {needed} bytes, report buffer holds {capacity}")]
    FormatFailed {
        /// Bytes required including the terminator.
        needed: usize,
        /// Buffer capacity in bytes.
        capacity: usize,
    },
}

impl QueryError {
    /// Name of the operation that failed, as written to the diagnostic stream.
    pub fn operation(&self) -> &'static str {
        match self {
            QueryError::InitFailed(_) => "topology_init",
            QueryError::LoadFailed(_) => "topology_load",
            QueryError::AllocFailed { .. } => "cpuset_alloc",
            QueryError::QueryFailed { operation, .. } => operation,
            QueryError::FormatFailed { .. } => "cpuset_format",
        }
    }
}

/// A participant order that is not a permutation of `0..n`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Orders must name at least one participant.
    #[error("participant order is empty")]
    Empty,
    /// A participant index is outside `0..len`.
    #[error("participant {participant} out of range for {len} participants")]
    OutOfRange {
        /// Offending index.
        participant: Participant,
        /// Number of participants.
        len: usize,
    },
    /// A participant appears twice.
    #[error("participant {0} appears more than once")]
    Duplicate(Participant),
}

/// Failure to move the token between ranks.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket or pipe I/O failed.
    #[error("token transport i/o on {path}: {source}")]
    Io {
        /// Endpoint the operation was addressed to.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A frame was truncated or carried garbage.
    #[error("malformed token frame: {0}")]
    Frame(String),
    /// The destination or source rank does not exist in this world.
    #[error("rank {rank} is outside world of size {world_size}")]
    UnknownRank {
        /// Offending rank.
        rank: Participant,
        /// World size of the run.
        world_size: usize,
    },
    /// The peer endpoint went away before delivering or accepting the token.
    #[error("peer rank {0} disconnected")]
    Disconnected(Participant),
}

/// Missing or invalid run configuration. Reported before any worker starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Worker count of zero.
    #[error("thread count must be at least 1")]
    ZeroThreads,
    /// World size of zero.
    #[error("world size must be at least 1")]
    ZeroWorld,
    /// A numeric setting could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    Invalid {
        /// Setting or environment variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
    /// A required setting is absent from the command line and environment.
    #[error("missing {0}; pass it on the command line or run under an MPI launcher")]
    Missing(&'static str),
    /// The rank does not fit the world size.
    #[error("rank {rank} is not below world size {world_size}")]
    RankOutOfWorld {
        /// Resolved rank.
        rank: Participant,
        /// Resolved world size.
        world_size: usize,
    },
    /// The pin list could not be parsed or was empty.
    #[error("invalid cpu list {0:?}")]
    CpuList(String),
    /// The participant order is not a permutation.
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// See [`QueryError`].
    #[error(transparent)]
    Query(#[from] QueryError),
    /// See [`TransportError`].
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A participant asked for a turn it has no place in.
    #[error(transparent)]
    Order(#[from] OrderError),
    /// Writing a report to its sink failed.
    #[error("writing report: {0}")]
    Report(#[source] io::Error),
}

/// Crate-level result.
pub type Result<T, E = Error> = std::result::Result<T, E>;
