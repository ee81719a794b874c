//! Unix-domain socket transport between rank processes.
//!
//! Every rank listens on `<dir>/rank-<r>.sock`. A send connects to the
//! receiver's socket, writes one [`Frame`], and closes. Connecting retries
//! until the receiver has bound its socket; there is no timeout. A frame
//! from a rank other than the one being received from is queued for a later
//! receive on that sender. A rank removes its socket when dropped, and
//! optionally the directory too once no other rank's socket is left in it.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::Participant;
use crate::error::TransportError;
use crate::rank::{Frame, Token, Transport};
use crate::util::WaitBudget;

/// Socket path of `rank` inside a rendezvous directory.
pub fn endpoint_path(dir: &Path, rank: Participant) -> PathBuf {
    dir.join(format!("rank-{rank}.sock"))
}

fn io_err(path: &Path, source: io::Error) -> TransportError {
    TransportError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// One rank process's endpoint.
pub struct SocketTransport {
    rank: Participant,
    world_size: usize,
    dir: PathBuf,
    listener: UnixListener,
    path: PathBuf,
    pending: Mutex<HashMap<Participant, VecDeque<Token>>>,
    remove_dir: bool,
}

impl SocketTransport {
    /// Bind `rank`'s socket in `dir`, creating the directory if needed and
    /// replacing a stale socket file left by an earlier run.
    pub fn bind(
        dir: impl Into<PathBuf>,
        rank: Participant,
        world_size: usize,
    ) -> Result<Self, TransportError> {
        if rank >= world_size {
            return Err(TransportError::UnknownRank { rank, world_size });
        }
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = endpoint_path(&dir, rank);
        match fs::remove_file(&path) {
            Ok(()) => tracing::warn!(path = %path.display(), "removed stale rank socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path, e)),
        }
        let listener = UnixListener::bind(&path).map_err(|e| io_err(&path, e))?;
        tracing::debug!(rank, path = %path.display(), "rank socket bound");
        Ok(Self {
            rank,
            world_size,
            dir,
            listener,
            path,
            pending: Mutex::new(HashMap::new()),
            remove_dir: false,
        })
    }

    /// Also remove the rendezvous directory on drop if it is empty by then.
    ///
    /// Rank `r` keeps its socket until its send to `r + 1` has connected, so
    /// the directory only empties after every rank has bound.
    pub fn remove_dir_on_drop(mut self, remove: bool) -> Self {
        self.remove_dir = remove;
        self
    }

    /// Rendezvous directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check(&self, rank: Participant) -> Result<(), TransportError> {
        if rank >= self.world_size {
            return Err(TransportError::UnknownRank {
                rank,
                world_size: self.world_size,
            });
        }
        Ok(())
    }

    fn connect(&self, to: Participant) -> Result<UnixStream, TransportError> {
        let path = endpoint_path(&self.dir, to);
        let mut budget = WaitBudget::idle();
        let mut announced = false;
        loop {
            match UnixStream::connect(&path) {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    if !announced {
                        tracing::debug!(rank = self.rank, to, "waiting for receiver to listen");
                        announced = true;
                    }
                    budget.step();
                }
                Err(e) => return Err(io_err(&path, e)),
            }
        }
    }
}

impl Transport for SocketTransport {
    #[inline]
    fn rank(&self) -> Participant {
        self.rank
    }

    #[inline]
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn send(&self, to: Participant, token: Token) -> Result<(), TransportError> {
        self.check(to)?;
        let frame = Frame {
            sender: self.rank as u32,
            token,
        };
        let mut stream = self.connect(to)?;
        stream
            .write_all(&frame.encode())
            .and_then(|()| stream.flush())
            .map_err(|e| io_err(&endpoint_path(&self.dir, to), e))
    }

    fn recv_from(&self, from: Participant) -> Result<Token, TransportError> {
        self.check(from)?;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = pending.get_mut(&from).and_then(VecDeque::pop_front) {
            return Ok(token);
        }
        loop {
            let (mut stream, _) = self.listener.accept().map_err(|e| io_err(&self.path, e))?;
            let frame = Frame::read_from(&mut stream)?;
            let sender = frame.sender as Participant;
            self.check(sender)?;
            if sender == from {
                return Ok(frame.token);
            }
            tracing::warn!(rank = self.rank, expected = from, sender, "queued token from unexpected sender");
            pending.entry(sender).or_default().push_back(frame.token);
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        // Fails while other ranks' sockets remain; the last one out succeeds.
        if self.remove_dir && fs::remove_dir(&self.dir).is_ok() {
            tracing::debug!(dir = %self.dir.display(), "rendezvous directory removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn token_crosses_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let a = SocketTransport::bind(dir.path(), 0, 2).unwrap();
        let b = SocketTransport::bind(dir.path(), 1, 2).unwrap();
        a.send(1, 1).unwrap();
        assert_eq!(b.recv_from(0).unwrap(), 1);
    }

    #[test]
    fn sender_waits_for_a_late_receiver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let a = SocketTransport::bind(&path, 0, 2).unwrap();
        let receiver = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            let b = SocketTransport::bind(&path, 1, 2).unwrap();
            b.recv_from(0).unwrap()
        });
        a.send(1, 1).unwrap();
        assert_eq!(receiver.join().unwrap(), 1);
    }

    #[test]
    fn unexpected_sender_is_queued_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let a = SocketTransport::bind(dir.path(), 0, 3).unwrap();
        let b = SocketTransport::bind(dir.path(), 1, 3).unwrap();
        let c = SocketTransport::bind(dir.path(), 2, 3).unwrap();
        a.send(2, 99).unwrap();
        b.send(2, 2).unwrap();
        assert_eq!(c.recv_from(1).unwrap(), 2);
        assert_eq!(c.recv_from(0).unwrap(), 99);
    }

    #[test]
    fn last_rank_out_removes_a_temporary_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        let a = SocketTransport::bind(&dir, 0, 2).unwrap().remove_dir_on_drop(true);
        let b = SocketTransport::bind(&dir, 1, 2).unwrap().remove_dir_on_drop(true);
        drop(a);
        assert!(dir.exists());
        drop(b);
        assert!(!dir.exists());
    }

    #[test]
    fn given_dir_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        drop(SocketTransport::bind(dir.path(), 0, 1).unwrap());
        assert!(dir.path().exists());
    }

    #[test]
    fn socket_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = endpoint_path(dir.path(), 0);
        drop(SocketTransport::bind(dir.path(), 0, 1).unwrap());
        assert!(!path.exists());
    }
}
