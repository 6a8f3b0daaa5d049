use crate::schema::SchemaError;
use crate::stream_engine::edge::{self, EdgeError, EdgeReceiver, EdgeSender, InEdge, OutEdge};
use crate::stream_engine::stats::{NodeStats, StatsCollector};
use crate::stream_engine::{Node, NodeTimer};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

/// Assembles a graph of nodes and runs each one on its own task.
pub struct StreamExecutor {
    task_id: Uuid,
    nodes: Vec<(String, Box<dyn Node>)>,
    // Registration order is dispatch order.
    edges: Vec<(String, String)>,
    external_inputs: HashMap<String, Vec<Box<dyn InEdge>>>,
    external_outputs: HashMap<String, Vec<Box<dyn OutEdge>>>,
    stats: StatsCollector,
}

impl Default for StreamExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamExecutor {
    pub fn new() -> Self {
        Self {
            task_id: Uuid::new_v4(),
            nodes: Vec::new(),
            edges: Vec::new(),
            external_inputs: HashMap::new(),
            external_outputs: HashMap::new(),
            stats: StatsCollector::new(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn add_node(&mut self, id: String, node: Box<dyn Node>) {
        self.nodes.push((id, node));
    }

    pub fn add_connection(&mut self, from: String, to: String) {
        self.edges.push((from, to));
    }

    pub fn add_input(&mut self, id: &str, input: Box<dyn InEdge>) {
        self.external_inputs.entry(id.to_string()).or_default().push(input);
    }

    /// Extra output for `id`, dispatched after its graph edges.
    pub fn add_output(&mut self, id: &str, output: Box<dyn OutEdge>) {
        self.external_outputs.entry(id.to_string()).or_default().push(output);
    }

    /// Returns the sending half of a new edge feeding node `id`. Dropping
    /// every such sender ends that input.
    pub fn input_for(&mut self, id: &str) -> EdgeSender {
        let (tx, rx) = edge::channel("input", id);
        self.add_input(id, Box::new(rx));
        tx
    }

    /// Returns the receiving half of a new edge fed by node `id`.
    pub fn output_from(&mut self, id: &str) -> EdgeReceiver {
        let (tx, rx) = edge::channel(id, "output");
        self.add_output(id, Box::new(tx));
        rx
    }

    /// Stats for every node, filled in once `run` starts.
    pub fn stats(&self) -> StatsCollector {
        self.stats.clone()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, (id, _)) in self.nodes.iter().enumerate() {
            if index.insert(id.as_str(), i).is_some() {
                return Err(SchemaError::DuplicateNode(id.clone()));
            }
        }

        let referenced = self
            .edges
            .iter()
            .flat_map(|(from, to)| [from, to])
            .chain(self.external_inputs.keys())
            .chain(self.external_outputs.keys());
        for id in referenced {
            if !index.contains_key(id.as_str()) {
                return Err(SchemaError::UnknownNode(id.clone()));
            }
        }

        // Kahn's algorithm
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, to) in &self.edges {
            let (from, to) = (index[from.as_str()], index[to.as_str()]);
            adj[from].push(to);
            in_degree[to] += 1;
        }
        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(node) = queue.pop() {
            visited += 1;
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }
        if visited != n {
            return Err(SchemaError::Cycle);
        }
        Ok(())
    }

    /// Runs every node until all inputs are exhausted. The first node failure
    /// aborts the rest of the graph and is returned.
    pub async fn run(self) -> Result<()> {
        self.validate()?;

        let StreamExecutor {
            task_id,
            nodes,
            edges,
            external_inputs,
            external_outputs,
            stats,
        } = self;

        let mut inputs = external_inputs;
        let mut outputs: HashMap<String, Vec<Box<dyn OutEdge>>> = HashMap::new();
        for (from, to) in &edges {
            let (tx, rx) = edge::channel(from.clone(), to.clone());
            outputs.entry(from.clone()).or_default().push(Box::new(tx));
            inputs.entry(to.clone()).or_default().push(Box::new(rx));
        }
        for (id, mut extra) in external_outputs {
            outputs.entry(id).or_default().append(&mut extra);
        }

        tracing::info!(task = %task_id, nodes = nodes.len(), edges = edges.len(), "starting task");

        let mut set = JoinSet::new();
        for (id, node) in nodes {
            let node_inputs = inputs.remove(&id).unwrap_or_default();
            let node_outputs = outputs.remove(&id).unwrap_or_default();
            let node_stats = Arc::new(NodeStats::new(id.as_str(), node.kind()));
            stats.register(node_stats.clone());
            let timer = NodeTimer::new(node_stats);

            let span = tracing::info_span!("node", task = %task_id, node = %id, kind = node.kind());
            set.spawn(
                async move {
                    tracing::debug!(inputs = node_inputs.len(), outputs = node_outputs.len(), "node started");
                    let result = node.run(node_inputs, node_outputs, &timer).await;
                    match &result {
                        Ok(()) => tracing::debug!(
                            collected = timer.stats().points_collected(),
                            emitted = timer.stats().points_emitted(),
                            "node finished"
                        ),
                        Err(e) => tracing::error!(error = %e, "node failed"),
                    }
                    result
                }
                .instrument(span),
            );
        }

        let mut failure: Option<anyhow::Error> = None;
        while let Some(joined) = set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(e.into()),
            };
            if let Err(err) = result {
                failure = Some(match failure {
                    None => {
                        set.abort_all();
                        err
                    }
                    Some(prev) => root_cause(prev, err),
                });
            }
        }

        match failure {
            Some(err) => {
                tracing::error!(task = %task_id, error = %err, "task failed");
                Err(err)
            }
            None => {
                tracing::info!(task = %task_id, "task finished");
                Ok(())
            }
        }
    }
}

/// An aborted edge is only a symptom of a failure further downstream.
fn root_cause(prev: anyhow::Error, next: anyhow::Error) -> anyhow::Error {
    let is_abort = |e: &anyhow::Error| e.downcast_ref::<EdgeError>().is_some();
    if is_abort(&prev) && !is_abort(&next) {
        next
    } else {
        prev
    }
}
