//! In-process transport: one unbounded channel per ordered (sender,
//! receiver) pair, so a receive on `from` can only ever see `from`'s tokens.

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::Participant;
use crate::error::TransportError;
use crate::rank::{Token, Transport};

/// One rank's end of a [`mesh`].
pub struct LocalEndpoint {
    rank: Participant,
    outboxes: Vec<Sender<Token>>,
    inboxes: Vec<Receiver<Token>>,
}

/// Fully connected mesh of `world_size` endpoints; endpoint `r` is rank `r`.
///
/// Each pair channel has exactly one sender and one receiver, so a rank that
/// drops its endpoint without sending shows up as `Disconnected` on the
/// other side instead of a silent hang.
pub fn mesh(world_size: usize) -> Vec<LocalEndpoint> {
    let mut pairs: Vec<Vec<Option<(Sender<Token>, Receiver<Token>)>>> = (0..world_size)
        .map(|_| (0..world_size).map(|_| Some(unbounded())).collect())
        .collect();
    let mut endpoints: Vec<LocalEndpoint> = (0..world_size)
        .map(|rank| LocalEndpoint {
            rank,
            outboxes: Vec::with_capacity(world_size),
            inboxes: Vec::with_capacity(world_size),
        })
        .collect();
    for from in 0..world_size {
        for to in 0..world_size {
            if let Some((tx, rx)) = pairs[from][to].take() {
                endpoints[from].outboxes.push(tx);
                endpoints[to].inboxes.push(rx);
            }
        }
    }
    endpoints
}

impl LocalEndpoint {
    fn check(&self, rank: Participant) -> Result<(), TransportError> {
        if rank >= self.outboxes.len() {
            return Err(TransportError::UnknownRank {
                rank,
                world_size: self.outboxes.len(),
            });
        }
        Ok(())
    }
}

impl Transport for LocalEndpoint {
    #[inline]
    fn rank(&self) -> Participant {
        self.rank
    }

    #[inline]
    fn world_size(&self) -> usize {
        self.outboxes.len()
    }

    fn send(&self, to: Participant, token: Token) -> Result<(), TransportError> {
        self.check(to)?;
        self.outboxes[to]
            .send(token)
            .map_err(|_| TransportError::Disconnected(to))
    }

    fn recv_from(&self, from: Participant) -> Result<Token, TransportError> {
        self.check(from)?;
        self.inboxes[from]
            .recv()
            .map_err(|_| TransportError::Disconnected(from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receives_are_matched_on_sender() {
        let mut eps = mesh(3);
        let c = eps.pop().unwrap();
        let b = eps.pop().unwrap();
        let a = eps.pop().unwrap();
        b.send(2, 20).unwrap();
        a.send(2, 10).unwrap();
        assert_eq!(c.recv_from(0).unwrap(), 10);
        assert_eq!(c.recv_from(1).unwrap(), 20);
    }

    #[test]
    fn per_pair_delivery_is_fifo() {
        let eps = mesh(2);
        for t in 0..5 {
            eps[0].send(1, t).unwrap();
        }
        let got: Vec<_> = (0..5).map(|_| eps[1].recv_from(0).unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn vanished_sender_is_reported() {
        let mut eps = mesh(2);
        let b = eps.pop().unwrap();
        drop(eps);
        assert!(matches!(b.recv_from(0), Err(TransportError::Disconnected(0))));
        assert!(matches!(
            b.send(7, 1),
            Err(TransportError::UnknownRank { rank: 7, world_size: 2 })
        ));
    }
}
