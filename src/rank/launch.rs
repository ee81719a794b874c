//! Spawns one child process per rank, all running the same program with the
//! rank, world size and rendezvous directory passed in the environment.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::Participant;
use crate::config::{ENV_RANK, ENV_RENDEZVOUS_DIR, ENV_WORLD_SIZE};

/// Launches `world_size` copies of `program`.
pub struct RankLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    world_size: usize,
}

/// Exit status of one rank process.
#[derive(Debug)]
pub struct RankExit {
    /// Rank of the child.
    pub rank: Participant,
    /// How it ended.
    pub status: ExitStatus,
}

impl RankLauncher {
    /// Launcher for `world_size` ranks of `program args...`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, world_size: usize) -> Self {
        Self {
            program: program.into(),
            args,
            world_size,
        }
    }

    fn command(&self, rank: Participant, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(ENV_RANK, rank.to_string())
            .env(ENV_WORLD_SIZE, self.world_size.to_string())
            .env(ENV_RENDEZVOUS_DIR, dir)
            .stdin(Stdio::null());
        cmd
    }

    /// Spawn every rank inside a fresh rendezvous directory and wait for all.
    ///
    /// Children inherit stdout and stderr; report order on stdout is the
    /// ranks' turn order. If a spawn fails, the ranks already running are
    /// killed, since they would wait forever on the missing one.
    pub fn run(&self) -> io::Result<Vec<RankExit>> {
        let dir = tempfile::Builder::new().prefix("cpubind-").tempdir()?;
        tracing::info!(world_size = self.world_size, dir = %dir.path().display(), "launching ranks");

        let mut children: Vec<Child> = Vec::with_capacity(self.world_size);
        for rank in 0..self.world_size {
            match self.command(rank, dir.path()).spawn() {
                Ok(child) => children.push(child),
                Err(e) => {
                    tracing::error!(rank, "spawn failed: {e}");
                    for mut child in children {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    return Err(e);
                }
            }
        }

        let mut exits = Vec::with_capacity(children.len());
        for (rank, mut child) in children.into_iter().enumerate() {
            let status = child.wait()?;
            if !status.success() {
                tracing::warn!(rank, %status, "rank exited with failure");
            }
            exits.push(RankExit { rank, status });
        }
        Ok(exits)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn every_rank_sees_its_environment() {
        let script = format!(
            "test \"${ENV_WORLD_SIZE}\" = 3 && test -d \"${ENV_RENDEZVOUS_DIR}\" && test \"${ENV_RANK}\" -lt 3"
        );
        let launcher = RankLauncher::new("/bin/sh", vec!["-c".into(), script.into()], 3);
        let exits = launcher.run().unwrap();
        assert_eq!(exits.len(), 3);
        assert!(exits.iter().all(|e| e.status.success()));
        assert_eq!(exits.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_program_is_an_error() {
        let launcher = RankLauncher::new("/nonexistent/cpubind", Vec::new(), 2);
        assert!(launcher.run().is_err());
    }
}
