use super::stats::NodeStats;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Measures a node's own cost per point. Time spent while a span is paused
/// (dispatching to children) is not counted.
#[derive(Clone)]
pub struct NodeTimer {
    stats: Arc<NodeStats>,
}

impl NodeTimer {
    pub fn new(stats: Arc<NodeStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<NodeStats> {
        &self.stats
    }

    pub fn start(&self) -> TimerSpan<'_> {
        TimerSpan {
            timer: self,
            running_since: Some(Instant::now()),
            elapsed: Duration::ZERO,
            stopped: false,
        }
    }
}

/// One point's worth of timing. Stops itself when dropped.
pub struct TimerSpan<'a> {
    timer: &'a NodeTimer,
    running_since: Option<Instant>,
    elapsed: Duration,
    stopped: bool,
}

impl TimerSpan<'_> {
    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.elapsed += since.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if !self.stopped && self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        if self.stopped {
            return self.elapsed;
        }
        self.pause();
        self.stopped = true;
        self.timer.stats.record_exec_time(self.elapsed);
        self.elapsed
    }
}

impl Drop for TimerSpan<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
