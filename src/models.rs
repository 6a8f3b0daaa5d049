use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub type Tags = BTreeMap<String, String>;
pub type Fields = BTreeMap<String, Value>;

/// Key identifying the series a point belongs to after grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub const NIL: GroupId = GroupId(String::new());

    /// Builds the key from `dims` in the given order. A dimension missing from
    /// `tags` contributes an empty value rather than being skipped. `\`, `,`
    /// and `=` are escaped with a backslash so distinct tag sets never collide.
    pub fn from_tags(tags: &Tags, dims: &[String]) -> Self {
        if dims.is_empty() {
            return Self::NIL;
        }
        let mut key = String::new();
        for (i, dim) in dims.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            push_escaped(&mut key, dim);
            key.push('=');
            if let Some(value) = tags.get(dim) {
                push_escaped(&mut key, value);
            }
        }
        GroupId(key)
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn push_escaped(key: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '\\' | ',' | '=') {
            key.push('\\');
        }
        key.push(c);
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tags feed the group id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Dimensions {
    pub fn all() -> Self {
        Self { all: true, tags: Vec::new() }
    }

    /// `"*"` anywhere in the list selects every tag; otherwise the names are
    /// sorted and de-duplicated so the key does not depend on config order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if name == "*" {
                return Self::all();
            }
            tags.push(name);
        }
        tags.sort();
        tags.dedup();
        Self { all: false, tags }
    }
}

/// A single timestamped record flowing through the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub retention_policy: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "GroupId::is_nil")]
    pub group: GroupId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
}

impl Point {
    pub fn new(name: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            time,
            name: name.into(),
            database: String::new(),
            retention_policy: String::new(),
            tags: Tags::new(),
            fields: Fields::new(),
            group: GroupId::NIL,
            dimensions: Vec::new(),
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn retention_policy(mut self, rp: impl Into<String>) -> Self {
        self.retention_policy = rp.into();
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the point with its group id recomputed from `dims`.
    pub fn with_group(mut self, dims: &Dimensions) -> Self {
        let names = if dims.all {
            self.tags.keys().cloned().collect()
        } else {
            dims.tags.clone()
        };
        self.group = GroupId::from_tags(&self.tags, &names);
        self.dimensions = names;
        self
    }

    /// Returns the point with `time` floored to a multiple of `every`,
    /// counted from the Unix epoch.
    pub fn truncated(mut self, every: Duration) -> Self {
        self.time = truncate_time(self.time, every);
        self
    }
}

pub fn truncate_time(time: DateTime<Utc>, every: Duration) -> DateTime<Utc> {
    let step = every.as_nanos() as i128;
    if step == 0 {
        return time;
    }
    let nanos = time.timestamp() as i128 * 1_000_000_000 + time.timestamp_subsec_nanos() as i128;
    let floored = nanos - nanos.rem_euclid(step);
    let secs = floored.div_euclid(1_000_000_000) as i64;
    let sub = floored.rem_euclid(1_000_000_000) as u32;
    match DateTime::from_timestamp(secs, sub) {
        Some(truncated) => truncated,
        None => {
            tracing::warn!(%time, every = ?every, "truncated time out of range, leaving point time unchanged");
            time
        }
    }
}
