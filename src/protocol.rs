//! The ring protocol: five synchronization phases run in lock-step by every
//! rank of the world. Each rank
//!
//! 1. enters a blocking barrier,
//! 2. passes its rank to its right neighbor while receiving from its left,
//!    completing both with a wait-all,
//! 3. enters a non-blocking barrier and waits on it,
//! 4. exchanges `k` tagged messages with the neighbors up to `k` steps away,
//!    draining its receives one at a time with wait-any,
//! 5. sums all ranks with an all-reduce.
//!
//! Rank 0 reports the world size after validation and the sum at the end.

use std::fmt;

use log::{debug, info};

use crate::comm::{Communicator, ReduceOp};
use crate::error::{Error, Result};
use crate::message::envelope::{Payload, Tag};
use crate::message::transport::Transport;
use crate::report::Reporter;
use crate::request::RequestSet;

/// Tag for the single-step ring exchange.
pub const RING_TAG: Tag = 100;

/// Tag of the first message in the multi-message exchange; message `i` uses
/// `MULTI_TAG_BASE + i`.
pub const MULTI_TAG_BASE: Tag = 200;

/// Default number of messages in the multi-message exchange.
pub const MESSAGE_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Validated,
    Barriered,
    RingExchanged,
    NonBlockingBarriered,
    MultiExchanged,
    Reduced,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Validated => "validated",
            Phase::Barriered => "barriered",
            Phase::RingExchanged => "ring-exchanged",
            Phase::NonBlockingBarriered => "non-blocking-barriered",
            Phase::MultiExchanged => "multi-exchanged",
            Phase::Reduced => "reduced",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Messages exchanged, in each direction, by the wait-any phase.
    pub message_count: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            message_count: MESSAGE_COUNT,
        }
    }
}

/// What one rank observed over a complete run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub world_size: usize,
    /// The value received from the left neighbor in the ring exchange.
    pub ring_received: Payload,
    /// Message `i` came from the rank `i + 1` steps to the left.
    pub multi_received: Vec<Payload>,
    pub global_sum: Payload,
}

/// The payload rank `rank` sends as message `index` of the multi-message
/// exchange.
///
pub fn multi_payload(rank: usize, index: usize) -> Payload {
    (rank * 10 + index) as Payload
}

fn multi_tag(index: usize) -> Tag {
    MULTI_TAG_BASE + index as Tag
}

pub struct RingProtocol<'c, T: Transport> {
    comm: &'c Communicator<T>,
    config: ProtocolConfig,
    phase: Phase,
}

impl<'c, T: Transport> RingProtocol<'c, T> {
    pub fn new(comm: &'c Communicator<T>, config: ProtocolConfig) -> Self {
        Self {
            comm,
            config,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run every phase in order. Fails without communicating if the world
    /// has fewer than two ranks.
    ///
    pub fn run(&mut self, reporter: &mut dyn Reporter) -> Result<Summary> {
        self.validate(reporter)?;
        self.comm.barrier()?;
        self.advance(Phase::Barriered);

        let ring_received = self.ring_exchange()?;
        self.advance(Phase::RingExchanged);

        self.comm.ibarrier()?.wait()?;
        self.advance(Phase::NonBlockingBarriered);

        let multi_received = self.multi_exchange()?;
        self.advance(Phase::MultiExchanged);

        let global_sum = self
            .comm
            .all_reduce(ReduceOp::Sum, self.comm.rank() as Payload)?;
        self.advance(Phase::Reduced);

        if self.comm.rank() == 0 {
            reporter.global_sum(global_sum);
        }
        self.advance(Phase::Done);

        Ok(Summary {
            world_size: self.comm.size(),
            ring_received,
            multi_received,
            global_sum,
        })
    }

    fn validate(&mut self, reporter: &mut dyn Reporter) -> Result<()> {
        let world = self.comm.world();
        if world.size() < 2 {
            if world.rank() == 0 {
                reporter.too_few_ranks();
            }
            return Err(Error::TooFewRanks { size: world.size() });
        }
        if world.rank() == 0 {
            reporter.world_size(world.size());
        }
        self.advance(Phase::Validated);
        Ok(())
    }

    fn ring_exchange(&self) -> Result<Payload> {
        let world = self.comm.world();
        let sent = world.rank() as Payload;
        let mut received: Payload = -1;

        let mut requests = RequestSet::new();
        requests.push(self.comm.irecv(&mut received, world.left(), RING_TAG)?);
        requests.push(self.comm.isend(&sent, world.right(), RING_TAG)?);
        requests.wait_all()?;

        debug!("[rank {}] received {} from {}", world.rank(), received, world.left());
        Ok(received)
    }

    fn multi_exchange(&self) -> Result<Vec<Payload>> {
        let world = self.comm.world();
        let k = self.config.message_count;
        let outbound: Vec<Payload> = (0..k).map(|i| multi_payload(world.rank(), i)).collect();
        let mut inbound: Vec<Payload> = vec![-1; k];

        let mut receives = inbound
            .iter_mut()
            .enumerate()
            .map(|(i, buffer)| {
                let source = world.neighbor(-(i as isize + 1));
                self.comm.irecv(buffer, source, multi_tag(i))
            })
            .collect::<Result<RequestSet<_>>>()?;

        let sends = outbound
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                let dest = world.neighbor(i as isize + 1);
                self.comm.isend(payload, dest, multi_tag(i))
            })
            .collect::<Result<RequestSet<_>>>()?;

        let mut completed = 0;
        while let Some(index) = receives.wait_any()? {
            debug!("[rank {}] receive {} of {} completed", world.rank(), index, k);
            completed += 1;
        }
        debug_assert_eq!(completed, k);
        drop(receives);

        sends.wait_all()?;
        Ok(inbound)
    }

    fn advance(&mut self, next: Phase) {
        info!("[rank {}] {} -> {}", self.comm.rank(), self.phase, next);
        self.phase = next;
    }
}
