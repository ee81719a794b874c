//! Run configuration: worker counts and rank identity, resolved from the
//! command line first and the environment second.
//!
//! Lookups take an environment accessor so resolution can be tested without
//! touching the process environment.

use std::path::PathBuf;

use crate::Participant;
use crate::error::ConfigError;

/// Rank handed to children by `cpubind ranks`.
pub const ENV_RANK: &str = "CPUBIND_RANK";
/// World size handed to children by `cpubind ranks`.
pub const ENV_WORLD_SIZE: &str = "CPUBIND_WORLD_SIZE";
/// Rendezvous directory handed to children by `cpubind ranks`.
pub const ENV_RENDEZVOUS_DIR: &str = "CPUBIND_RENDEZVOUS_DIR";
/// OpenMP's requested team size.
pub const ENV_OMP_NUM_THREADS: &str = "OMP_NUM_THREADS";

/// Variables naming the local rank, in lookup order.
pub const RANK_VARS: [&str; 4] = [
    ENV_RANK,
    "MPI_LOCALRANKID",
    "OMPI_COMM_WORLD_LOCAL_RANK",
    "PMI_RANK",
];

/// Variables naming the local world size, in lookup order.
pub const WORLD_SIZE_VARS: [&str; 4] = [
    ENV_WORLD_SIZE,
    "MPI_LOCALNRANKS",
    "OMPI_COMM_WORLD_LOCAL_SIZE",
    "PMI_SIZE",
];

/// Reads the real process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_count(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn first_var(
    vars: &[&'static str],
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<usize>, ConfigError> {
    for &name in vars {
        if let Some(raw) = env(name) {
            return parse_count(name, &raw).map(Some);
        }
    }
    Ok(None)
}

/// Worker count: explicit value, then `OMP_NUM_THREADS` (first level of a
/// nested list), then `default`.
pub fn resolve_thread_count(
    explicit: Option<usize>,
    env: impl Fn(&str) -> Option<String>,
    default: impl FnOnce() -> usize,
) -> Result<usize, ConfigError> {
    let n = match explicit {
        Some(n) => n,
        None => match env(ENV_OMP_NUM_THREADS) {
            Some(raw) => {
                let first = raw.split(',').next().unwrap_or_default();
                parse_count(ENV_OMP_NUM_THREADS, first)?
            }
            None => default(),
        },
    };
    if n == 0 {
        return Err(ConfigError::ZeroThreads);
    }
    Ok(n)
}

/// Identity of one rank process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankConfig {
    /// This process's rank.
    pub rank: Participant,
    /// Number of ranks.
    pub world_size: usize,
    /// Directory holding the rank sockets.
    pub rendezvous: PathBuf,
    /// Whether `rendezvous` is the per-run default, to be removed once the
    /// last rank has left it.
    pub temporary: bool,
}

impl RankConfig {
    /// Resolve from explicit values, then the environment.
    ///
    /// Without a rendezvous directory, ranks started by the same parent
    /// (an MPI process manager) meet in `$TMPDIR/cpubind-<parent pid>`.
    pub fn resolve(
        rank: Option<Participant>,
        world_size: Option<usize>,
        rendezvous: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let rank = match rank {
            Some(r) => r,
            None => first_var(&RANK_VARS, &env)?.ok_or(ConfigError::Missing("rank"))?,
        };
        let world_size = match world_size {
            Some(n) => n,
            None => first_var(&WORLD_SIZE_VARS, &env)?.ok_or(ConfigError::Missing("world size"))?,
        };
        if world_size == 0 {
            return Err(ConfigError::ZeroWorld);
        }
        if rank >= world_size {
            return Err(ConfigError::RankOutOfWorld { rank, world_size });
        }
        let given = rendezvous.or_else(|| env(ENV_RENDEZVOUS_DIR).map(PathBuf::from));
        let temporary = given.is_none();
        let rendezvous = given.unwrap_or_else(default_rendezvous);
        Ok(Self {
            rank,
            world_size,
            rendezvous,
            temporary,
        })
    }
}

fn default_rendezvous() -> PathBuf {
    #[cfg(unix)]
    let parent = std::os::unix::process::parent_id();
    #[cfg(not(unix))]
    let parent = std::process::id();
    std::env::temp_dir().join(format!("cpubind-{parent}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn thread_count_prefers_explicit_then_omp_then_default() {
        let env = env_of(&[(ENV_OMP_NUM_THREADS, "6,2")]);
        assert_eq!(resolve_thread_count(Some(3), &env, || 8), Ok(3));
        assert_eq!(resolve_thread_count(None, &env, || 8), Ok(6));
        assert_eq!(resolve_thread_count(None, env_of(&[]), || 8), Ok(8));
    }

    #[test]
    fn thread_count_rejects_zero_and_garbage() {
        assert_eq!(
            resolve_thread_count(Some(0), env_of(&[]), || 8),
            Err(ConfigError::ZeroThreads)
        );
        assert!(matches!(
            resolve_thread_count(None, env_of(&[(ENV_OMP_NUM_THREADS, "many")]), || 8),
            Err(ConfigError::Invalid { name: ENV_OMP_NUM_THREADS, .. })
        ));
    }

    #[test]
    fn rank_comes_from_mpi_environment() {
        let env = env_of(&[
            ("OMPI_COMM_WORLD_LOCAL_RANK", "2"),
            ("OMPI_COMM_WORLD_LOCAL_SIZE", "4"),
            (ENV_RENDEZVOUS_DIR, "/tmp/run"),
        ]);
        let cfg = RankConfig::resolve(None, None, None, env).unwrap();
        assert_eq!(
            cfg,
            RankConfig {
                rank: 2,
                world_size: 4,
                rendezvous: PathBuf::from("/tmp/run"),
                temporary: false,
            }
        );
    }

    #[test]
    fn launcher_variables_win_over_mpi_ones() {
        let env = env_of(&[
            (ENV_RANK, "1"),
            ("MPI_LOCALRANKID", "0"),
            (ENV_WORLD_SIZE, "2"),
        ]);
        let cfg = RankConfig::resolve(None, None, None, env).unwrap();
        assert_eq!((cfg.rank, cfg.world_size), (1, 2));
        assert!(cfg.rendezvous.starts_with(std::env::temp_dir()));
        assert!(cfg.temporary);
    }

    #[test]
    fn rank_configuration_errors() {
        assert_eq!(
            RankConfig::resolve(None, Some(2), None, env_of(&[])),
            Err(ConfigError::Missing("rank"))
        );
        assert_eq!(
            RankConfig::resolve(Some(2), Some(2), None, env_of(&[])),
            Err(ConfigError::RankOutOfWorld {
                rank: 2,
                world_size: 2
            })
        );
        assert_eq!(
            RankConfig::resolve(Some(0), Some(0), None, env_of(&[])),
            Err(ConfigError::ZeroWorld)
        );
    }
}
