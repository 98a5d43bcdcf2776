use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use log::trace;

use crate::error::{Error, Result};
use crate::message::envelope::{Channel, Envelope, Payload, Tag};
use crate::message::{transport::Transport, util};
use crate::request::Request;
use crate::topology::{Rank, World};

/// Associative, commutative operators for reductions. Integer arithmetic
/// wraps rather than overflowing.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

impl ReduceOp {
    pub fn apply(self, a: Payload, b: Payload) -> Payload {
        match self {
            ReduceOp::Sum => a.wrapping_add(b),
            ReduceOp::Prod => a.wrapping_mul(b),
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Messages that have arrived but not yet been matched by a receive, keyed
/// by where they came from and what they are matched on. Within one key they
/// are kept in arrival order.
///
#[derive(Default)]
struct Mailbox {
    arrived: HashMap<(Rank, Channel), VecDeque<Payload>>,
}

impl Mailbox {
    fn deliver(&mut self, envelope: Envelope) {
        self.arrived
            .entry((envelope.source, envelope.channel))
            .or_insert_with(VecDeque::new)
            .push_back(envelope.payload)
    }

    fn take(&mut self, source: Rank, channel: Channel) -> Option<Payload> {
        let queue = self.arrived.get_mut(&(source, channel))?;
        let payload = queue.pop_front();
        if queue.is_empty() {
            self.arrived.remove(&(source, channel));
        }
        payload
    }

    fn len(&self) -> usize {
        self.arrived.values().map(VecDeque::len).sum()
    }
}

/// Tagged point-to-point messaging and collectives for a group of ranks,
/// built on any [`Transport`]. Non-blocking operations hand back a
/// [`Request`]; progress is made only while some caller is waiting or
/// testing, by moving envelopes from the transport into the mailbox.
///
/// A communicator is driven by a single thread of control. Every rank must
/// issue the same sequence of collective calls; a rank that skips one leaves
/// its peers blocked.
///
pub struct Communicator<T: Transport> {
    transport: T,
    world: World,
    mailbox: RefCell<Mailbox>,
    next_collective: Cell<u64>,
}

impl<T: Transport> Communicator<T> {
    pub fn new(transport: T) -> Result<Self> {
        let world = World::new(transport.rank(), transport.size())?;
        Ok(Self {
            transport,
            world,
            mailbox: RefCell::new(Mailbox::default()),
            next_collective: Cell::new(0),
        })
    }

    pub fn rank(&self) -> Rank {
        self.world.rank()
    }

    pub fn size(&self) -> usize {
        self.world.size()
    }

    pub fn world(&self) -> World {
        self.world
    }

    /// Give back the transport, e.g. to flush it before the process exits.
    /// Unmatched messages still in the mailbox are discarded.
    ///
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Number of arrived messages no receive has claimed yet.
    ///
    pub fn unmatched(&self) -> usize {
        self.mailbox.borrow().len()
    }

    /// Post a send of `payload` to `peer`. Transports never wait for a
    /// matching receive, so the returned request is already complete; it
    /// keeps the payload borrowed until it is waited on or dropped.
    ///
    pub fn isend<'a>(&'a self, payload: &'a Payload, peer: Rank, tag: Tag) -> Result<Request<'a, T>> {
        self.post(peer, Channel::Tagged(tag), *payload)?;
        Ok(Request::send(self, payload))
    }

    /// Post a receive from `peer` into `buffer`. The buffer is written only
    /// when the returned request completes, and cannot be read before then.
    ///
    pub fn irecv<'a>(&'a self, buffer: &'a mut Payload, peer: Rank, tag: Tag) -> Result<Request<'a, T>> {
        let peer = self.world.check(peer)?;
        Ok(Request::recv(self, buffer, peer, tag))
    }

    /// Announce arrival at a barrier to every other rank and return without
    /// waiting. The request completes once every other rank has announced
    /// its arrival at the same barrier.
    ///
    pub fn ibarrier(&self) -> Result<Request<'_, T>> {
        let channel = self.next_collective();
        let peers: Vec<Rank> = (0..self.size()).filter(|&r| r != self.rank()).collect();
        for &peer in &peers {
            self.post(peer, channel, 0)?;
        }
        Ok(Request::barrier(self, channel, peers))
    }

    /// Block until every rank has entered this barrier.
    ///
    pub fn barrier(&self) -> Result<()> {
        self.all_reduce(ReduceOp::Sum, 0).map(|_| ())
    }

    /// Implements a binomial tree broadcast from rank 0. The value must be
    /// `Some` on rank 0; it is ignored elsewhere.
    ///
    pub fn broadcast(&self, value: Option<Payload>) -> Result<Payload> {
        let channel = self.next_collective();
        let r = self.rank();
        let p = self.size();

        let value = if r == 0 {
            value.ok_or(Error::MissingBroadcastValue)?
        } else {
            self.recv_from(r & (r - 1), channel)?
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.post(r + one, channel, value)?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce to rank 0. All ranks return `None`
    /// except for the root.
    ///
    pub fn reduce(&self, op: ReduceOp, mut value: Payload) -> Result<Option<Payload>> {
        let channel = self.next_collective();
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = op.apply(value, self.recv_from(r + one, channel)?)
                }
            } else {
                self.post(r - one, channel, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation: every rank gets
    /// the same result.
    ///
    pub fn all_reduce(&self, op: ReduceOp, value: Payload) -> Result<Payload> {
        let reduced = self.reduce(op, value)?;
        self.broadcast(reduced)
    }

    pub(crate) fn take(&self, source: Rank, channel: Channel) -> Option<Payload> {
        self.mailbox.borrow_mut().take(source, channel)
    }

    /// Block until the transport yields one more envelope, and file it.
    ///
    pub(crate) fn progress(&self) -> Result<()> {
        let bytes = self.transport.recv()?;
        self.file(&bytes)
    }

    /// File every envelope the transport has ready, without blocking.
    ///
    pub(crate) fn progress_available(&self) -> Result<()> {
        while let Some(bytes) = self.transport.try_recv()? {
            self.file(&bytes)?;
        }
        Ok(())
    }

    fn file(&self, bytes: &[u8]) -> Result<()> {
        let envelope = Envelope::decode(bytes)?;
        trace!(
            "[rank {}] arrived from {} on {:?}",
            self.rank(),
            envelope.source,
            envelope.channel
        );
        self.mailbox.borrow_mut().deliver(envelope);
        Ok(())
    }

    fn post(&self, dest: Rank, channel: Channel, payload: Payload) -> Result<()> {
        let dest = self.world.check(dest)?;
        let envelope = Envelope::new(self.rank(), channel, payload);

        if dest == self.rank() {
            self.mailbox.borrow_mut().deliver(envelope);
            Ok(())
        } else {
            self.transport.send(dest, envelope.encode()?)
        }
    }

    fn recv_from(&self, source: Rank, channel: Channel) -> Result<Payload> {
        loop {
            if let Some(payload) = self.take(source, channel) {
                return Ok(payload);
            }
            self.progress()?
        }
    }

    fn next_collective(&self) -> Channel {
        let seq = self.next_collective.get();
        self.next_collective.set(seq + 1);
        Channel::Collective(seq)
    }
}
