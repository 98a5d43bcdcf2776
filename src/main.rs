use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use simple_logger::SimpleLogger;

use collective_comm_demo::error::Error;
use collective_comm_demo::launch;
use collective_comm_demo::protocol::{ProtocolConfig, MESSAGE_COUNT};
use collective_comm_demo::report::ConsoleReporter;

#[derive(Debug, Parser)]
#[clap(version = "0.1", author = "J. Zrake <jzrake@clemson.edu>")]
#[clap(about = "Barrier, ring exchange, wait-any drain, and all-reduce across a ring of ranks")]
struct Opts {
    /// Log more; repeat for more detail
    #[clap(short = 'v', long, parse(from_occurrences))]
    verbose: usize,

    #[clap(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Run every rank as a thread of this process
    Local {
        #[clap(short = 'n', long, default_value = "4")]
        ranks: usize,

        #[clap(short = 'k', long, default_value_t = MESSAGE_COUNT)]
        messages: usize,
    },
    /// Run this process as one rank of a TCP-connected group
    Tcp {
        #[clap(short = 'r', long)]
        rank: usize,

        /// Listening address of every rank, in rank order
        #[clap(short = 'p', long, required = true, value_delimiter = ',')]
        peers: Vec<SocketAddr>,

        #[clap(short = 'k', long, default_value_t = MESSAGE_COUNT)]
        messages: usize,
    },
}

fn log_level(verbose: usize) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// The diagnostic for a too-small world has already been printed by rank 0.
fn log_failure(e: &Error) {
    if !matches!(e, Error::TooFewRanks { .. }) {
        error!("{}", e);
    }
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    if let Err(e) = SimpleLogger::new().with_level(log_level(opts.verbose)).init() {
        eprintln!("logger setup failed: {}", e);
    }

    let succeeded = match opts.mode {
        Mode::Local { ranks, messages } => {
            let config = ProtocolConfig {
                message_count: messages,
            };
            let results = launch::run_local(ranks, config, &mut ConsoleReporter);
            results.iter().filter_map(|r| r.as_ref().err()).for_each(log_failure);
            !results.is_empty() && results.iter().all(|r| r.is_ok())
        }
        Mode::Tcp {
            rank,
            peers,
            messages,
        } => {
            let config = ProtocolConfig {
                message_count: messages,
            };
            match launch::run_tcp(rank, peers, config, &mut ConsoleReporter) {
                Ok(_) => true,
                Err(e) => {
                    log_failure(&e);
                    false
                }
            }
        }
    };

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
