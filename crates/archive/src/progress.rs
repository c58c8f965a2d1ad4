//! Progress reporting hook
//!
//! Sessions notify a sink after each asset is written or yielded. Sinks are
//! observers only: nothing they do affects the archive.

use std::fmt;

/// Receiver of progress notifications
pub trait ProgressSink {
    /// Called with the fraction of assets processed (0.0 to 1.0) and a
    /// short human-readable message
    fn report(&self, fraction: f32, message: &str);
}

/// Sink that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f32, _message: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(f32, &str),
{
    fn report(&self, fraction: f32, message: &str) {
        self(fraction, message)
    }
}

/// Tracks processed/total for a session
pub(crate) struct Progress {
    sink: Box<dyn ProgressSink + Send>,
    done: u64,
    total: u64,
}

impl Progress {
    pub(crate) fn new(total: u64) -> Self {
        Self {
            sink: Box::new(NoProgress),
            done: 0,
            total,
        }
    }

    pub(crate) fn set_sink(&mut self, sink: Box<dyn ProgressSink + Send>) {
        self.sink = sink;
    }

    pub(crate) fn advance(&mut self, message: &str) {
        self.done += 1;
        let fraction = if self.total == 0 {
            1.0
        } else {
            (self.done as f64 / self.total as f64).min(1.0) as f32
        };
        self.sink.report(fraction, message);
    }

    pub(crate) fn done(&self) -> u64 {
        self.done
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("done", &self.done)
            .field("total", &self.total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fractions_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);

        let mut progress = Progress::new(4);
        progress.set_sink(Box::new(move |fraction: f32, message: &str| {
            sink_seen.lock().unwrap().push((fraction, message.to_string()));
        }));

        for name in ["a", "b", "c", "d"] {
            progress.advance(name);
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (0.25, "a".to_string()));
        assert_eq!(seen[3], (1.0, "d".to_string()));
        assert_eq!(progress.done(), 4);
    }

    #[test]
    fn test_zero_total_is_complete() {
        let mut progress = Progress::new(0);
        progress.advance("extra");
        assert_eq!(progress.done(), 1);
    }
}
