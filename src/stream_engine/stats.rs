use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Per-node counters. Written only by the node's own run loop.
pub struct NodeStats {
    node_id: String,
    kind: &'static str,
    points_collected: AtomicU64,
    points_emitted: AtomicU64,
    exec_time_ns: AtomicU64,
    exec_samples: AtomicU64,
}

impl NodeStats {
    pub fn new(node_id: impl Into<String>, kind: &'static str) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            points_collected: AtomicU64::new(0),
            points_emitted: AtomicU64::new(0),
            exec_time_ns: AtomicU64::new(0),
            exec_samples: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn points_collected(&self) -> u64 {
        self.points_collected.load(Ordering::Relaxed)
    }

    pub fn points_emitted(&self) -> u64 {
        self.points_emitted.load(Ordering::Relaxed)
    }

    pub fn record_collected(&self) {
        self.points_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.points_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exec_time(&self, elapsed: Duration) {
        self.exec_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.exec_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Total self time across every handled point, excluding downstream work.
    pub fn total_exec_time(&self) -> Duration {
        Duration::from_nanos(self.exec_time_ns.load(Ordering::Relaxed))
    }

    pub fn avg_exec_time(&self) -> Duration {
        let samples = self.exec_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.exec_time_ns.load(Ordering::Relaxed) / samples)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub node_id: String,
    pub kind: &'static str,
    pub collected: u64,
    pub emitted: u64,
    pub avg_exec_time_us: u64,
}

/// Shared registry of node stats for one task.
#[derive(Clone, Default)]
pub struct StatsCollector {
    nodes: Arc<Mutex<BTreeMap<String, Arc<NodeStats>>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // The map only holds counters, so a panic elsewhere cannot leave it torn.
    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Arc<NodeStats>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, stats: Arc<NodeStats>) {
        self.nodes().insert(stats.node_id().to_string(), stats);
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeStats>> {
        self.nodes().get(node_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<StatsSnapshot> {
        self.nodes()
            .values()
            .map(|stats| StatsSnapshot {
                node_id: stats.node_id().to_string(),
                kind: stats.kind(),
                collected: stats.points_collected(),
                emitted: stats.points_emitted(),
                avg_exec_time_us: stats.avg_exec_time().as_micros() as u64,
            })
            .collect()
    }

    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return "No nodes registered".to_string();
        }

        let mut report = String::from("=== Task Stats ===\n");
        for s in snapshot {
            report.push_str(&format!(
                "[{}] {}: collected={} emitted={} avg_exec={}us\n",
                s.node_id, s.kind, s.collected, s.emitted, s.avg_exec_time_us
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisoned_registry_still_records() {
        let collector = StatsCollector::new();
        let shared = collector.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.nodes.lock().unwrap();
            panic!("poison the registry");
        })
        .join();
        assert!(collector.nodes.is_poisoned());

        collector.register(Arc::new(NodeStats::new("from0", "from")));
        assert!(collector.get("from0").is_some());
        assert_eq!(collector.snapshot().len(), 1);
        assert!(collector.report().contains("from0"));
    }
}
