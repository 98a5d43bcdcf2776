use crate::error::{Error, Result};

/// Identity of a peer process within the world.
pub type Rank = usize;

/// Return the rank found `offset` steps around a ring of `size` ranks,
/// starting from `rank`. Negative offsets walk to the left. Offsets of any
/// magnitude wrap around, and the result always lies in `0..size`.
///
pub fn neighbor_rank(rank: Rank, size: usize, offset: isize) -> Rank {
    debug_assert!(size >= 1, "a ring needs at least one rank");
    let shift = offset.rem_euclid(size as isize) as usize;
    (rank % size + shift) % size
}

/// This process's place in the group: its own rank and the number of ranks.
/// Fixed for the lifetime of a run.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct World {
    rank: Rank,
    size: usize,
}

impl World {
    pub fn new(rank: Rank, size: usize) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(Error::InvalidRank { rank, size });
        }
        Ok(Self { rank, size })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The rank `offset` steps away from this one on the ring.
    ///
    pub fn neighbor(&self, offset: isize) -> Rank {
        neighbor_rank(self.rank, self.size, offset)
    }

    pub fn left(&self) -> Rank {
        self.neighbor(-1)
    }

    pub fn right(&self) -> Rank {
        self.neighbor(1)
    }

    /// Check that `rank` names a member of this world.
    ///
    pub fn check(&self, rank: Rank) -> Result<Rank> {
        if rank < self.size {
            Ok(rank)
        } else {
            Err(Error::InvalidRank {
                rank,
                size: self.size,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbor_is_in_range_and_congruent() {
        for size in 1..=9usize {
            for rank in 0..size {
                for offset in -30isize..=30 {
                    let n = neighbor_rank(rank, size, offset);
                    assert!(n < size);
                    let expected = (rank as isize + offset).rem_euclid(size as isize) as usize;
                    assert_eq!(n, expected, "rank={} size={} offset={}", rank, size, offset);
                }
            }
        }
    }

    #[test]
    fn unit_offsets_never_self_route() {
        for size in 2..=9usize {
            for rank in 0..size {
                assert_ne!(neighbor_rank(rank, size, 1), rank);
                assert_ne!(neighbor_rank(rank, size, -1), rank);
            }
        }
    }

    #[test]
    fn extreme_offsets_do_not_overflow() {
        assert_eq!(neighbor_rank(3, 7, isize::MAX), (3 + (isize::MAX % 7) as usize) % 7);
        assert!(neighbor_rank(3, 7, isize::MIN) < 7);
        assert_eq!(neighbor_rank(0, 1, isize::MIN), 0);
    }

    #[test]
    fn world_neighbors_wrap() {
        let world = World::new(0, 4).unwrap();
        assert_eq!(world.left(), 3);
        assert_eq!(world.right(), 1);
        assert_eq!(world.neighbor(-5), 3);
        assert_eq!(world.neighbor(6), 2);
    }

    #[test]
    fn world_rejects_bad_identity() {
        assert!(matches!(
            World::new(4, 4),
            Err(Error::InvalidRank { rank: 4, size: 4 })
        ));
        assert!(World::new(0, 0).is_err());
        assert!(World::new(0, 1).is_ok());
    }

    #[test]
    fn check_rejects_out_of_world_peers() {
        let world = World::new(1, 3).unwrap();
        assert_eq!(world.check(2).unwrap(), 2);
        assert!(world.check(3).is_err());
    }
}
