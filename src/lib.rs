//! A small exercise of asynchronous point-to-point and collective
//! communication among a fixed group of ranks arranged in a ring. Each rank
//! runs the same sequence of phases: a blocking barrier, a non-blocking ring
//! exchange completed with wait-all, a non-blocking barrier, a
//! multi-message exchange drained with wait-any, and a sum all-reduce.
//!
//! The [`Communicator`](comm::Communicator) provides tagged `isend` / `irecv`
//! and tree-based collectives over any [`Transport`](message::transport::Transport);
//! in-process and TCP transports are included.

pub mod comm;
pub mod error;
pub mod launch;
pub mod message;
pub mod protocol;
pub mod report;
pub mod request;
pub mod topology;

pub use comm::{Communicator, ReduceOp};
pub use error::{Error, Result};
pub use request::{Request, RequestSet};
pub use topology::{neighbor_rank, Rank, World};
