use crate::error::Result;
use crate::topology::Rank;

/// Interface for a group of processes that can exchange raw messages. The
/// underlying medium can be in-process channels, TCP, or anything else that
/// moves bytes between ranks. Matching, tagging, and collectives are layered
/// on top of this by the [`Communicator`](crate::comm::Communicator).
///
pub trait Transport {
    /// Must be implemented to return the rank of this process within the
    /// group.
    fn rank(&self) -> Rank;

    /// Must be implemented to return the number of peer processes in the
    /// group, including this one.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: Rank, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready to be received.
    fn recv(&self) -> Result<Vec<u8>>;

    /// Must be implemented to return a message if one has already arrived,
    /// and `None` otherwise. This method must never block.
    fn try_recv(&self) -> Result<Option<Vec<u8>>>;
}
