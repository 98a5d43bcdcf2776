use log::warn;

use crate::comm::Communicator;
use crate::error::Result;
use crate::message::envelope::{Channel, Payload, Tag};
use crate::message::transport::Transport;
use crate::topology::Rank;

enum Operation<'a> {
    Send {
        _payload: &'a Payload,
    },
    Recv {
        source: Rank,
        tag: Tag,
        buffer: &'a mut Payload,
    },
    Barrier {
        channel: Channel,
        waiting_on: Vec<Rank>,
    },
}

/// A handle to a posted non-blocking operation.
///
/// The request holds the buffer it was posted with for as long as it lives:
/// a send buffer cannot be modified, and a receive buffer cannot be read,
/// until the request is waited on or dropped. Completion is one-way and is
/// only observed through [`Request::wait`], [`Request::test`], or a
/// [`RequestSet`].
///
pub struct Request<'a, T: Transport> {
    comm: &'a Communicator<T>,
    operation: Operation<'a>,
    completed: bool,
}

impl<'a, T: Transport> Request<'a, T> {
    pub(crate) fn send(comm: &'a Communicator<T>, payload: &'a Payload) -> Self {
        Self::new(comm, Operation::Send { _payload: payload })
    }

    pub(crate) fn recv(comm: &'a Communicator<T>, buffer: &'a mut Payload, source: Rank, tag: Tag) -> Self {
        Self::new(comm, Operation::Recv { source, tag, buffer })
    }

    pub(crate) fn barrier(comm: &'a Communicator<T>, channel: Channel, waiting_on: Vec<Rank>) -> Self {
        Self::new(comm, Operation::Barrier { channel, waiting_on })
    }

    fn new(comm: &'a Communicator<T>, operation: Operation<'a>) -> Self {
        // A send is posted only after the transport has taken its payload.
        let completed = matches!(operation, Operation::Send { .. });
        Self {
            comm,
            operation,
            completed,
        }
    }

    /// Check if this request has been observed to complete.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Block until the operation has completed. After this returns, the
    /// buffer the request was posted with is released.
    ///
    pub fn wait(mut self) -> Result<()> {
        while !self.poll() {
            self.comm.progress()?;
        }
        Ok(())
    }

    /// Report whether the operation has completed, without blocking.
    ///
    pub fn test(&mut self) -> Result<bool> {
        if self.poll() {
            return Ok(true);
        }
        self.comm.progress_available()?;
        Ok(self.poll())
    }

    /// Try to complete the operation from messages that have already been
    /// filed in the mailbox.
    fn poll(&mut self) -> bool {
        if self.completed {
            return true;
        }
        let comm = self.comm;
        self.completed = match &mut self.operation {
            Operation::Send { .. } => true,
            Operation::Recv { source, tag, buffer } => match comm.take(*source, Channel::Tagged(*tag)) {
                Some(payload) => {
                    **buffer = payload;
                    true
                }
                None => false,
            },
            Operation::Barrier {
                channel,
                waiting_on,
            } => {
                let channel = *channel;
                waiting_on.retain(|&peer| comm.take(peer, channel).is_none());
                waiting_on.is_empty()
            }
        };
        self.completed
    }
}

impl<'a, T: Transport> Drop for Request<'a, T> {
    fn drop(&mut self) {
        if !self.completed {
            warn!("[rank {}] dropping a request that never completed", self.comm.rank());
        }
    }
}

/// An ordered collection of requests that can be completed together or one
/// at a time. Members are addressed by the index they were pushed at. A
/// member reported complete by [`RequestSet::wait_any`] leaves the set, and
/// its index is never reported again. All members must come from the same
/// communicator.
///
pub struct RequestSet<'a, T: Transport> {
    slots: Vec<Option<Request<'a, T>>>,
}

impl<'a, T: Transport> RequestSet<'a, T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Add a request, returning its index.
    pub fn push(&mut self, request: Request<'a, T>) -> usize {
        debug_assert!(
            self.communicator()
                .map_or(true, |comm| std::ptr::eq(comm, request.comm)),
            "requests in a set must share a communicator"
        );
        self.slots.push(Some(request));
        self.slots.len() - 1
    }

    /// Number of members ever added, including those already completed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Number of members not yet reported complete.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether every member has been reported complete.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Block until every remaining member has completed. Members complete in
    /// whatever order their messages arrive.
    ///
    pub fn wait_all(mut self) -> Result<()> {
        for slot in self.slots.iter_mut() {
            if let Some(request) = slot.take() {
                request.wait()?;
            }
        }
        Ok(())
    }

    /// Block until some remaining member completes and return its index. If
    /// no members remain, return `None` immediately.
    ///
    pub fn wait_any(&mut self) -> Result<Option<usize>> {
        let comm = match self.communicator() {
            Some(comm) => comm,
            None => return Ok(None),
        };
        loop {
            if let Some(index) = self.poll_any() {
                return Ok(Some(index));
            }
            comm.progress()?;
        }
    }

    /// Like [`RequestSet::wait_any`], but never blocks: `None` means either
    /// that no members remain or that none has completed yet.
    ///
    pub fn test_any(&mut self) -> Result<Option<usize>> {
        let comm = match self.communicator() {
            Some(comm) => comm,
            None => return Ok(None),
        };
        if let Some(index) = self.poll_any() {
            return Ok(Some(index));
        }
        comm.progress_available()?;
        Ok(self.poll_any())
    }

    fn poll_any(&mut self) -> Option<usize> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(request) = slot {
                if request.poll() {
                    slot.take();
                    return Some(index);
                }
            }
        }
        None
    }

    fn communicator(&self) -> Option<&'a Communicator<T>> {
        self.slots.iter().flatten().next().map(|request| request.comm)
    }
}

impl<'a, T: Transport> Default for RequestSet<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Transport> FromIterator<Request<'a, T>> for RequestSet<'a, T> {
    fn from_iter<I: IntoIterator<Item = Request<'a, T>>>(iter: I) -> Self {
        let mut set = Self::new();
        for request in iter {
            set.push(request);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::local::LocalTransport;
    use std::thread;

    fn pair() -> (Communicator<LocalTransport>, Communicator<LocalTransport>) {
        let mut group = LocalTransport::group(2);
        let b = Communicator::new(group.pop().unwrap()).unwrap();
        let a = Communicator::new(group.pop().unwrap()).unwrap();
        (a, b)
    }

    #[test]
    fn wait_any_reports_each_index_once_then_none() {
        let (a, b) = pair();
        let payloads: Vec<Payload> = vec![10, 11, 12, 13];
        let mut buffers = vec![-1; 4];

        let sends: RequestSet<_> = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| a.isend(p, 1, i as Tag).unwrap())
            .collect();
        sends.wait_all().unwrap();

        let mut receives: RequestSet<_> = buffers
            .iter_mut()
            .enumerate()
            .map(|(i, buf)| b.irecv(buf, 0, i as Tag).unwrap())
            .collect();

        let mut seen = Vec::new();
        while let Some(index) = receives.wait_any().unwrap() {
            seen.push(index);
        }
        assert_eq!(receives.len(), 4);
        assert!(receives.is_empty());
        assert_eq!(receives.wait_any().unwrap(), None);
        drop(receives);

        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(buffers, payloads);
    }

    #[test]
    fn empty_set_answers_none_immediately() {
        let mut set: RequestSet<'_, LocalTransport> = RequestSet::new();
        assert_eq!(set.wait_any().unwrap(), None);
        assert_eq!(set.test_any().unwrap(), None);
        assert!(set.wait_all().is_ok());
    }

    #[test]
    fn test_any_does_not_block_on_missing_messages() {
        let (a, b) = pair();
        let mut buffer: Payload = -1;
        let mut receives = RequestSet::new();
        receives.push(b.irecv(&mut buffer, 0, 9).unwrap());
        assert_eq!(receives.test_any().unwrap(), None);
        assert_eq!(receives.pending(), 1);

        let payload: Payload = 99;
        a.isend(&payload, 1, 9).unwrap().wait().unwrap();
        assert_eq!(receives.test_any().unwrap(), Some(0));
        assert_eq!(receives.test_any().unwrap(), None);
        drop(receives);
        assert_eq!(buffer, 99);
    }

    #[test]
    fn request_test_completes_once_the_message_arrives() {
        let (a, b) = pair();
        let mut buffer: Payload = 0;
        {
            let mut request = b.irecv(&mut buffer, 0, 1).unwrap();
            assert!(!request.test().unwrap());
            assert!(!request.is_completed());

            let payload: Payload = -5;
            a.isend(&payload, 1, 1).unwrap().wait().unwrap();
            assert!(request.test().unwrap());
            assert!(request.is_completed());
        }
        assert_eq!(buffer, -5);
    }

    #[test]
    fn wait_any_blocks_until_a_peer_sends() {
        let (a, b) = pair();
        let sender = thread::spawn(move || {
            let payloads: Vec<Payload> = vec![1, 2, 3];
            for (i, p) in payloads.iter().enumerate().rev() {
                a.isend(p, 1, i as Tag).unwrap().wait().unwrap();
            }
            a.ibarrier().unwrap().wait().unwrap();
        });

        let mut buffers = vec![0; 3];
        let mut receives: RequestSet<_> = buffers
            .iter_mut()
            .enumerate()
            .map(|(i, buf)| b.irecv(buf, 0, i as Tag).unwrap())
            .collect();
        let mut completed = 0;
        while receives.wait_any().unwrap().is_some() {
            completed += 1;
        }
        drop(receives);
        b.ibarrier().unwrap().wait().unwrap();
        sender.join().unwrap();

        assert_eq!(completed, 3);
        assert_eq!(buffers, vec![1, 2, 3]);
    }

    #[test]
    fn posted_sends_are_already_complete() {
        let (a, b) = pair();
        let payload: Payload = 4;
        let send = a.isend(&payload, 1, 2).unwrap();
        assert!(send.is_completed());
        drop(send);

        let mut buffer: Payload = 0;
        let receive = b.irecv(&mut buffer, 0, 2).unwrap();
        assert!(!receive.is_completed());
        receive.wait().unwrap();
        assert_eq!(buffer, 4);
    }

    #[test]
    fn ibarrier_waits_for_every_peer() {
        let (a, b) = pair();
        let mut request = a.ibarrier().unwrap();
        assert!(!request.test().unwrap());
        b.ibarrier().unwrap().wait().unwrap();
        request.wait().unwrap();
    }
}
