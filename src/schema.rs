use crate::stream_engine::nodes::FromConfig;
use crate::stream_engine::{factory, StreamExecutor};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Stream,
    From(FromConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
    #[error("duplicate node id {0:?}")]
    DuplicateNode(String),
    #[error("edge references unknown node {0:?}")]
    UnknownNode(String),
    #[error("task graph contains a cycle")]
    Cycle,
}

impl TaskDefinition {
    /// Reads a task from disk. `.toml` files are parsed as TOML, everything
    /// else as YAML (which also accepts JSON).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read task file {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Node ids with no incoming edge.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !self.edges.iter().any(|e| e.to == n.id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Node ids with no outgoing edge.
    pub fn leaves(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !self.edges.iter().any(|e| e.from == n.id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Builds every node and wires every edge. Node construction errors
    /// surface here, before any point flows.
    pub fn to_executor(&self) -> Result<StreamExecutor> {
        let mut executor = StreamExecutor::new();

        for node_def in &self.nodes {
            let node = factory::create(&node_def.kind)
                .with_context(|| format!("failed to create node {:?}", node_def.id))?;
            executor.add_node(node_def.id.clone(), node);
        }

        for edge_def in &self.edges {
            executor.add_connection(edge_def.from.clone(), edge_def.to.clone());
        }

        executor.validate()?;
        Ok(executor)
    }
}

/// Influx-style duration literals such as `10s`, `1m` or `500ms`.
pub mod duration {
    use super::SchemaError;
    use std::time::Duration;

    const UNITS: &[(&str, u64)] = &[
        ("ns", 1),
        ("us", 1_000),
        ("u", 1_000),
        ("µ", 1_000),
        ("ms", 1_000_000),
        ("s", 1_000_000_000),
        ("m", 60 * 1_000_000_000),
        ("h", 3_600 * 1_000_000_000),
        ("d", 86_400 * 1_000_000_000),
        ("w", 7 * 86_400 * 1_000_000_000),
    ];

    pub fn parse(s: &str) -> Result<Duration, SchemaError> {
        let invalid = || SchemaError::InvalidDuration(s.to_string());
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (digits, unit) = s.split_at(split);
        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        let (_, scale) = UNITS.iter().find(|(u, _)| *u == unit).ok_or_else(invalid)?;
        amount.checked_mul(*scale).map(Duration::from_nanos).ok_or_else(invalid)
    }

    /// Renders with the largest unit that divides the duration exactly.
    pub fn format(d: Duration) -> String {
        let nanos = d.as_nanos() as u64;
        if nanos == 0 {
            return "0s".to_string();
        }
        for (unit, scale) in UNITS.iter().rev() {
            if matches!(*unit, "u" | "µ") {
                continue;
            }
            if nanos % scale == 0 {
                return format!("{}{}", nanos / scale, unit);
            }
        }
        format!("{}ns", nanos)
    }

    pub mod option {
        use serde::{de, Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => s.serialize_str(&super::format(*d)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|s| super::parse(&s).map_err(de::Error::custom)).transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_durations() {
        assert_eq!(duration::parse("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(duration::parse("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(duration::parse("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(duration::parse("10u").unwrap(), Duration::from_micros(10));
        assert!(duration::parse("m").is_err());
        assert!(duration::parse("10").is_err());
        assert!(duration::parse("10y").is_err());
    }

    #[test]
    fn formats_with_largest_unit() {
        assert_eq!(duration::format(Duration::from_secs(60)), "1m");
        assert_eq!(duration::format(Duration::from_secs(90)), "90s");
        assert_eq!(duration::format(Duration::from_micros(3)), "3us");
    }

    #[test]
    fn loads_yaml_task() {
        let task = TaskDefinition::from_yaml(
            r#"
nodes:
  - id: in
    type: stream
  - id: cpu
    type: from
    database: db1
    measurement: cpu
    where: 'usage > 10'
    dimensions: [host]
    truncate: 1m
edges:
  - from: in
    to: cpu
"#,
        )
        .unwrap();

        assert_eq!(task.roots(), vec!["in"]);
        assert_eq!(task.leaves(), vec!["cpu"]);
        match &task.nodes[1].kind {
            NodeKind::From(cfg) => {
                assert_eq!(cfg.database, "db1");
                assert_eq!(cfg.where_expr.as_deref(), Some("usage > 10"));
                assert_eq!(cfg.truncate, Some(Duration::from_secs(60)));
                assert!(cfg.retention_policy.is_empty());
            }
            other => panic!("unexpected node kind {:?}", other),
        }
    }

    #[test]
    fn loads_toml_task() {
        let task = TaskDefinition::from_toml(
            r#"
[[nodes]]
id = "in"
type = "stream"

[[nodes]]
id = "all"
type = "from"
dimensions = ["*"]

[[edges]]
from = "in"
to = "all"
"#,
        )
        .unwrap();
        assert_eq!(task.nodes.len(), 2);
        assert_eq!(task.edges.len(), 1);
    }

    #[test]
    fn bad_expression_fails_before_running() {
        let task = TaskDefinition::from_yaml(
            r#"
nodes:
  - id: bad
    type: from
    where: 'usage >'
"#,
        )
        .unwrap();
        assert!(task.to_executor().is_err());
    }
}
