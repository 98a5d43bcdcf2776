use crate::message::envelope::Payload;

/// Printed by rank 0 when the world is too small to form a ring.
pub const TOO_FEW_RANKS: &str = "This demo requires at least two MPI ranks.";

const PREFIX: &str = "[collective_comm_demo]";

pub fn world_size_line(size: usize) -> String {
    format!("{} world_size={}", PREFIX, size)
}

pub fn global_sum_line(sum: Payload) -> String {
    format!("{} global sum={}", PREFIX, sum)
}

/// Where the protocol sends its user-facing output. Only rank 0 reports.
///
pub trait Reporter {
    fn world_size(&mut self, size: usize);
    fn global_sum(&mut self, sum: Payload);
    fn too_few_ranks(&mut self);
}

/// Writes the report lines to stdout, and the diagnostic to stderr.
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn world_size(&mut self, size: usize) {
        println!("{}", world_size_line(size));
    }

    fn global_sum(&mut self, sum: Payload) {
        println!("{}", global_sum_line(sum));
    }

    fn too_few_ranks(&mut self) {
        eprintln!("{}", TOO_FEW_RANKS);
    }
}

/// Keeps the report lines in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordingReporter {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl Reporter for RecordingReporter {
    fn world_size(&mut self, size: usize) {
        self.stdout.push(world_size_line(size));
    }

    fn global_sum(&mut self, sum: Payload) {
        self.stdout.push(global_sum_line(sum));
    }

    fn too_few_ranks(&mut self) {
        self.stderr.push(TOO_FEW_RANKS.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_match_the_published_format() {
        assert_eq!(world_size_line(4), "[collective_comm_demo] world_size=4");
        assert_eq!(global_sum_line(6), "[collective_comm_demo] global sum=6");
        assert_eq!(global_sum_line(-1), "[collective_comm_demo] global sum=-1");
    }

    #[test]
    fn recorder_separates_streams() {
        let mut recorder = RecordingReporter::default();
        recorder.world_size(2);
        recorder.too_few_ranks();
        recorder.global_sum(1);
        assert_eq!(
            recorder.stdout,
            vec![world_size_line(2), global_sum_line(1)]
        );
        assert_eq!(recorder.stderr, vec![TOO_FEW_RANKS.to_string()]);
    }
}
