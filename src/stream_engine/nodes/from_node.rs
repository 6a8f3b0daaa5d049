use crate::models::{Dimensions, Point};
use crate::schema::duration;
use crate::stream_engine::expressions::{Predicate, WhereExpression};
use crate::stream_engine::Node;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Settings for a [`FromNode`]. Empty filters match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FromConfig {
    pub database: String,
    pub retention_policy: String,
    pub measurement: String,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_expr: Option<String>,
    /// Tag names to group by; `"*"` groups by every tag.
    pub dimensions: Vec<String>,
    #[serde(with = "duration::option")]
    pub truncate: Option<Duration>,
}

/// Filters points by database, retention policy, measurement and an optional
/// predicate, then truncates their time and regroups them.
pub struct FromNode {
    database: String,
    retention_policy: String,
    measurement: String,
    predicate: Option<Box<dyn Predicate>>,
    dimensions: Dimensions,
    truncate: Duration,
    eval_errors: AtomicU64,
}

impl FromNode {
    pub fn new(config: FromConfig) -> Result<Self> {
        let predicate = match &config.where_expr {
            Some(src) => {
                let expr = WhereExpression::compile(src.as_str())
                    .context("failed to compile from expression")?;
                Some(Box::new(expr) as Box<dyn Predicate>)
            }
            None => None,
        };
        Ok(Self::build(config, predicate))
    }

    /// Uses `predicate` in place of any `where` expression in `config`.
    pub fn with_predicate(config: FromConfig, predicate: Box<dyn Predicate>) -> Self {
        Self::build(config, Some(predicate))
    }

    fn build(config: FromConfig, predicate: Option<Box<dyn Predicate>>) -> Self {
        Self {
            database: config.database,
            retention_policy: config.retention_policy,
            measurement: config.measurement,
            predicate,
            dimensions: Dimensions::from_names(config.dimensions),
            truncate: config.truncate.unwrap_or_default(),
            eval_errors: AtomicU64::new(0),
        }
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// Number of points dropped because the predicate failed to evaluate.
    pub fn eval_errors(&self) -> u64 {
        self.eval_errors.load(Ordering::Relaxed)
    }

    pub fn matches(&self, p: &Point) -> bool {
        if !self.database.is_empty() && p.database != self.database {
            return false;
        }
        if !self.retention_policy.is_empty() && p.retention_policy != self.retention_policy {
            return false;
        }
        if !self.measurement.is_empty() && p.name != self.measurement {
            return false;
        }
        match &self.predicate {
            Some(predicate) => match predicate.evaluate(p.time, &p.fields, &p.tags) {
                Ok(pass) => pass,
                Err(e) => {
                    self.eval_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, measurement = %p.name, "error while evaluating WHERE expression");
                    false
                }
            },
            None => true,
        }
    }
}

impl Node for FromNode {
    fn kind(&self) -> &'static str {
        "from"
    }

    fn process(&self, point: Point) -> Option<Point> {
        if !self.matches(&point) {
            return None;
        }
        let point = if self.truncate.is_zero() {
            point
        } else {
            point.truncated(self.truncate)
        };
        Some(point.with_group(&self.dimensions))
    }
}
