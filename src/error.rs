use crate::topology::Rank;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the communicator, its transports, and the ring protocol.
///
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("world size {size} is too small: at least two ranks are required")]
    TooFewRanks { size: usize },

    #[error("invalid rank {rank}: world size is {size}")]
    InvalidRank { rank: Rank, size: usize },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("broadcast root supplied no value")]
    MissingBroadcastValue,

    #[error("transport is closed")]
    TransportClosed,

    #[error("run aborted after another rank failed")]
    Aborted,

    #[error("rank {rank} panicked")]
    RankPanicked { rank: Rank },

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("receiver acknowledged {acked} bytes but {sent} were sent")]
    AckMismatch { sent: usize, acked: usize },

    #[error("envelope encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("envelope decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_ranks_names_the_size() {
        let e = Error::TooFewRanks { size: 1 };
        assert_eq!(
            e.to_string(),
            "world size 1 is too small: at least two ranks are required"
        );
    }

    #[test]
    fn invalid_rank_display() {
        let e = Error::InvalidRank { rank: 5, size: 4 };
        assert_eq!(e.to_string(), "invalid rank 5: world size is 4");
    }

    #[test]
    fn frame_too_large_names_both_sizes() {
        let e = Error::FrameTooLarge { size: 10, max: 4 };
        assert_eq!(e.to_string(), "frame of 10 bytes exceeds the 4 byte limit");
        assert_eq!(Error::RankPanicked { rank: 2 }.to_string(), "rank 2 panicked");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let e: Error = io_err.into();
        assert!(e.to_string().contains("port busy"));
    }
}
