//! Ways of starting a world of ranks and running the ring protocol on it:
//! every rank as a thread of this process, or this process as one rank of a
//! TCP-connected group.

use std::net::SocketAddr;
use std::thread;

use log::{debug, error, info};

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::message::envelope::Payload;
use crate::message::local::{Abort, LocalTransport};
use crate::message::{tcp::TcpTransport, transport::Transport};
use crate::protocol::{ProtocolConfig, RingProtocol, Summary};
use crate::report::Reporter;

/// Stands in for the reporter on ranks other than 0, which never report.
struct Quiet;

impl Reporter for Quiet {
    fn world_size(&mut self, _size: usize) {}
    fn global_sum(&mut self, _sum: Payload) {}
    fn too_few_ranks(&mut self) {}
}

/// Triggers the abort when dropped during a panic, so peers of a rank that
/// died stop waiting for it.
struct AbortOnPanic<'a>(&'a Abort);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.trigger();
        }
    }
}

/// Run `size` ranks, one thread each, over in-process channels. Rank 0
/// reports through `reporter`. The result of each rank is returned in rank
/// order. If any rank fails or panics, the rest are aborted rather than left
/// waiting on it. An empty world is refused the way a single rank is.
///
pub fn run_local<R>(size: usize, config: ProtocolConfig, reporter: &mut R) -> Vec<Result<Summary>>
where
    R: Reporter + Send,
{
    if size == 0 {
        reporter.too_few_ranks();
        return vec![Err(Error::TooFewRanks { size })];
    }
    info!("Starting {} local ranks", size);
    let (group, abort) = LocalTransport::abortable_group(size);
    let abort = &abort;
    let mut reporter = Some(reporter);

    thread::scope(|scope| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|transport| {
                let rank_reporter = if transport.rank() == 0 {
                    reporter.take()
                } else {
                    None
                };
                scope.spawn(move || -> Result<Summary> {
                    let _guard = AbortOnPanic(abort);
                    let rank = transport.rank();
                    let result = Communicator::new(transport).and_then(|comm| {
                        let mut protocol = RingProtocol::new(&comm, config);
                        match rank_reporter {
                            Some(reporter) => protocol.run(reporter),
                            None => protocol.run(&mut Quiet),
                        }
                    });
                    if let Err(e) = &result {
                        debug!("[rank {}] failed: {}", rank, e);
                        abort.trigger();
                    }
                    result
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(Error::RankPanicked { rank }))
            })
            .collect()
    })
}

/// Run this process as rank `rank` of the group listening on `peers`. All
/// outbound messages are flushed before returning.
///
pub fn run_tcp(
    rank: usize,
    peers: Vec<SocketAddr>,
    config: ProtocolConfig,
    reporter: &mut dyn Reporter,
) -> Result<Summary> {
    info!("Starting rank {} of {}", rank, peers.len());
    run_on_tcp(TcpTransport::bind(rank, peers)?, config, reporter)
}

/// Run the protocol on an already-started TCP transport, then flush it.
///
pub fn run_on_tcp(
    transport: TcpTransport,
    config: ProtocolConfig,
    reporter: &mut dyn Reporter,
) -> Result<Summary> {
    let comm = Communicator::new(transport)?;
    let rank = comm.rank();
    let result = RingProtocol::new(&comm, config).run(reporter);

    if let Err(e) = comm.into_transport().flush() {
        error!("[rank {}] failed to flush outbound messages: {}", rank, e);
        if result.is_ok() {
            return Err(e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{RecordingReporter, TOO_FEW_RANKS};

    #[test]
    fn local_run_of_three_reports_once() {
        let mut reporter = RecordingReporter::default();
        let results = run_local(3, ProtocolConfig::default(), &mut reporter);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.as_ref().map(|s| s.global_sum).ok() == Some(3)));
        assert_eq!(reporter.stdout.len(), 2);
    }

    #[test]
    fn local_run_of_one_fails_with_diagnostic() {
        let mut reporter = RecordingReporter::default();
        let results = run_local(1, ProtocolConfig::default(), &mut reporter);
        assert!(matches!(results[0], Err(Error::TooFewRanks { size: 1 })));
        assert_eq!(reporter.stderr, vec![TOO_FEW_RANKS.to_string()]);
    }

    #[test]
    fn local_run_of_zero_prints_the_diagnostic() {
        let mut reporter = RecordingReporter::default();
        let results = run_local(0, ProtocolConfig::default(), &mut reporter);
        assert!(matches!(results[..], [Err(Error::TooFewRanks { size: 0 })]));
        assert_eq!(reporter.stderr, vec![TOO_FEW_RANKS.to_string()]);
    }

    /// Dies the way a logger or reporter does when stdout is a closed pipe.
    struct ClosedStdout;

    impl Reporter for ClosedStdout {
        fn world_size(&mut self, _size: usize) {
            panic!("failed printing to stdout: Broken pipe");
        }
        fn global_sum(&mut self, _sum: Payload) {}
        fn too_few_ranks(&mut self) {}
    }

    #[test]
    fn a_panicking_rank_ends_the_whole_run() {
        for size in [2, 3, 5] {
            let results = run_local(size, ProtocolConfig::default(), &mut ClosedStdout);
            assert_eq!(results.len(), size);
            assert!(matches!(results[0], Err(Error::RankPanicked { rank: 0 })));
            assert!(results.iter().all(Result::is_err));
        }
    }
}
