use std::sync::Mutex;

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};

use super::transport::Transport;
use crate::error::{Error, Result};
use crate::topology::Rank;

/// A transport for a group of ranks living in one process, typically one
/// thread per rank. Every rank owns the receiving end of its own channel and
/// a sending end to every rank's channel.
///
pub struct LocalTransport {
    rank: Rank,
    outboxes: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
    abort: Receiver<()>,
}

/// Ends every blocked or future receive in a group created by
/// [`LocalTransport::abortable_group`]. Nothing is ever sent on the abort
/// channel; the group sees it disconnect instead.
///
pub struct Abort {
    trigger: Mutex<Option<Sender<()>>>,
}

impl Abort {
    pub fn trigger(&self) {
        if let Ok(mut trigger) = self.trigger.lock() {
            trigger.take();
        }
    }
}

impl LocalTransport {
    /// Create a fully connected group of `size` transports. The transport at
    /// index `n` of the returned vector has rank `n`.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        Self::connect(size, crossbeam_channel::never())
    }

    /// Like [`LocalTransport::group`], but also return a handle that makes
    /// every receive in the group fail with [`Error::Aborted`]. A rank whose
    /// peer has died would otherwise wait on its inbox forever, since the
    /// inbox senders held by the survivors keep it connected.
    ///
    pub fn abortable_group(size: usize) -> (Vec<Self>, Abort) {
        let (trigger, abort) = crossbeam_channel::bounded(0);
        let abort_handle = Abort {
            trigger: Mutex::new(Some(trigger)),
        };
        (Self::connect(size, abort), abort_handle)
    }

    fn connect(size: usize, abort: Receiver<()>) -> Vec<Self> {
        let (outboxes, inboxes): (Vec<_>, Vec<_>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalTransport {
                rank,
                outboxes: outboxes.clone(),
                inbox,
                abort: abort.clone(),
            })
            .collect()
    }

    fn aborted(&self) -> bool {
        matches!(self.abort.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.outboxes.len()
    }

    fn send(&self, rank: Rank, message: Vec<u8>) -> Result<()> {
        self.outboxes
            .get(rank)
            .ok_or(Error::InvalidRank {
                rank,
                size: self.size(),
            })?
            .send(message)
            .map_err(|_| Error::PeerDisconnected { rank })
    }

    fn recv(&self) -> Result<Vec<u8>> {
        select! {
            recv(self.inbox) -> message => message.map_err(|_| Error::TransportClosed),
            recv(self.abort) -> _ => Err(Error::Aborted),
        }
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        if self.aborted() {
            return Err(Error::Aborted);
        }
        match self.inbox.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::TransportClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_ranks_are_in_order() {
        let group = LocalTransport::group(3);
        let ranks: Vec<_> = group.iter().map(|t| t.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(group.iter().all(|t| t.size() == 3));
    }

    #[test]
    fn messages_reach_their_destination() {
        let group = LocalTransport::group(2);
        group[0].send(1, b"hello".to_vec()).unwrap();
        group[1].send(1, b"self".to_vec()).unwrap();
        assert_eq!(group[1].recv().unwrap(), b"hello".to_vec());
        assert_eq!(group[1].recv().unwrap(), b"self".to_vec());
    }

    #[test]
    fn try_recv_does_not_block() {
        let group = LocalTransport::group(2);
        assert_eq!(group[1].try_recv().unwrap(), None);
        group[0].send(1, vec![7]).unwrap();
        assert_eq!(group[1].try_recv().unwrap(), Some(vec![7]));
    }

    #[test]
    fn sending_outside_the_group_fails() {
        let group = LocalTransport::group(2);
        assert!(matches!(
            group[0].send(2, vec![]),
            Err(Error::InvalidRank { rank: 2, size: 2 })
        ));
    }

    #[test]
    fn abort_wakes_a_blocked_receiver() {
        let (mut group, abort) = LocalTransport::abortable_group(2);
        let waiting = group.pop().unwrap();
        let blocked = std::thread::spawn(move || waiting.recv());

        abort.trigger();
        assert!(matches!(blocked.join().unwrap(), Err(Error::Aborted)));
        assert!(matches!(group[0].try_recv(), Err(Error::Aborted)));
        abort.trigger();
    }

    #[test]
    fn plain_group_is_never_aborted() {
        let group = LocalTransport::group(1);
        assert!(!group[0].aborted());
        group[0].send(0, vec![1]).unwrap();
        assert_eq!(group[0].recv().unwrap(), vec![1]);
    }

    #[test]
    fn sending_to_a_dropped_rank_fails() {
        let mut group = LocalTransport::group(2);
        let survivor = group.remove(0);
        drop(group);
        assert!(matches!(
            survivor.send(1, vec![1]),
            Err(Error::PeerDisconnected { rank: 1 })
        ));
    }
}
