use std::{iter::Take, time::Duration};

/// Provides a mechanism for managing attempting to complete an operation
/// and retrying the operation, with a backoff, if it fails.
///
/// This iterator provides an infinite stream of back off durations, where
/// the duration increases by an exponential factor up to some maximum delay.
/// Upon reaching the maximum delay, that value will be returned from then
/// on. Bound the number of attempts with [Iterator::take].
///
/// The delays are meant to be slept with [std::thread::sleep]; so, in its
/// current design, do NOT use this with asynchronous code.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.curr;
        let new_next = self.curr * self.factor;

        self.curr = if new_next > self.max {
            self.max
        } else {
            new_next
        };

        Some(current.min(self.max))
    }
}

/// The Retry trait provides a protocol for retrying a function returning a
/// [Result] until either it succeeds or the [Iterator] of delays completes.
pub trait Retry: Iterator<Item = Duration> + Sized {
    /// Retry the given function until it returns [Ok]. After every failed
    /// attempt but the last, `sleep` is handed the error and the delay to
    /// wait before the next attempt; it is where callers log and sleep. If
    /// the [Iterator] finishes without a successful execution of `f` then the
    /// last [Err] is returned. An empty iterator yields `None`.
    ///
    fn retry<F, S, T, E>(&mut self, mut f: F, mut sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: FnMut(&E, Duration),
    {
        let mut last_err = None;
        let mut iter = self.by_ref().peekable();
        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_then_saturate() {
        let delays: Vec<_> = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            2,
        )
        .take(5)
        .collect();
        assert_eq!(
            delays,
            vec![10, 20, 40, 50, 50]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn retry_succeeds_after_failures() {
        let mut attempts = 0;
        let mut slept = Vec::new();
        let result = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2)
            .take(5)
            .retry(
                || {
                    attempts += 1;
                    if attempts < 3 {
                        Err(attempts)
                    } else {
                        Ok("connected")
                    }
                },
                |e, _| slept.push(*e),
            );
        assert_eq!(result, Some(Ok("connected")));
        assert_eq!(slept, vec![1, 2]);
    }

    #[test]
    fn retry_returns_last_error_when_exhausted() {
        let mut attempts = 0;
        let mut sleeps = 0;
        let result: Option<Result<(), usize>> =
            ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2)
                .take(3)
                .retry(
                    || {
                        attempts += 1;
                        Err(attempts)
                    },
                    |_, _| sleeps += 1,
                );
        assert_eq!(result, Some(Err(3)));
        assert_eq!(sleeps, 2);
    }
}
