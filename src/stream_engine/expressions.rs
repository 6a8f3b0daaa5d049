use crate::models::{Fields, Tags};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, Expression, UndefinedBehavior, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Boolean test over a point's time, fields and tags.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, time: DateTime<Utc>, fields: &Fields, tags: &Tags) -> Result<bool>;
}

/// Helper names; these stay callable even when a point carries a field or tag
/// of the same name.
const FUNCTIONS: &[&str] = &["hour", "minute", "weekday", "unix", "abs"];

static ENVIRONMENT: OnceLock<Environment<'static>> = OnceLock::new();

fn environment() -> &'static Environment<'static> {
    ENVIRONMENT.get_or_init(create_environment)
}

pub fn create_environment() -> Environment<'static> {
    let mut env = Environment::new();
    // Undefined values fail loudly instead of reading as false.
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    // Keep FUNCTIONS in sync.
    env.add_function("hour", hour);
    env.add_function("minute", minute);
    env.add_function("weekday", weekday);
    env.add_function("unix", unix);
    env.add_function("abs", abs);

    env
}

/// A compiled WHERE expression, e.g. `usage_idle < 10 and host == "a"`.
pub struct WhereExpression {
    source: String,
    expr: Expression<'static, 'static>,
    references: Vec<String>,
}

impl WhereExpression {
    pub fn compile(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let expr = environment()
            .compile_expression_owned(source.clone())
            .map_err(|e| anyhow!("failed to compile expression {:?}: {}", source, e))?;
        let mut references: Vec<String> = expr
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !FUNCTIONS.contains(&name.as_str()))
            .collect();
        references.sort();
        Ok(Self {
            source,
            expr,
            references,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names the expression reads from the point, `time` included.
    pub fn references(&self) -> &[String] {
        &self.references
    }
}

impl fmt::Debug for WhereExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WhereExpression").field(&self.source).finish()
    }
}

impl Predicate for WhereExpression {
    fn evaluate(&self, time: DateTime<Utc>, fields: &Fields, tags: &Tags) -> Result<bool> {
        // Only referenced names enter the scope, so nothing on the point can
        // shadow a helper function. Fields win over tags of the same name.
        let mut scope: BTreeMap<&str, Value> = BTreeMap::new();
        for name in &self.references {
            let value = if name == "time" {
                Value::from(time.to_rfc3339())
            } else if let Some(field) = fields.get(name) {
                Value::from_serialize(field)
            } else if let Some(tag) = tags.get(name) {
                Value::from(tag.as_str())
            } else {
                return Err(anyhow!("no field or tag exists for {}", name));
            };
            scope.insert(name, value);
        }

        let result = self.expr.eval(scope)?;
        if result.kind() != ValueKind::Bool {
            return Err(anyhow!(
                "expression {:?} did not evaluate to a boolean, got {}",
                self.source,
                result.kind()
            ));
        }
        Ok(result.is_true())
    }
}

fn parse_time(ts: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid time {:?}: {}", ts, e)))
}

fn hour(ts: String) -> Result<u32, Error> {
    Ok(parse_time(&ts)?.hour())
}

fn minute(ts: String) -> Result<u32, Error> {
    Ok(parse_time(&ts)?.minute())
}

fn weekday(ts: String) -> Result<u32, Error> {
    Ok(parse_time(&ts)?.weekday().num_days_from_sunday())
}

fn unix(ts: String) -> Result<i64, Error> {
    Ok(parse_time(&ts)?.timestamp())
}

fn abs(v: Value) -> Result<Value, Error> {
    if let Ok(i) = i64::try_from(v.clone()) {
        return i.checked_abs().map(Value::from).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, format!("abs of {} overflows", i))
        });
    }
    if let Ok(f) = f64::try_from(v.clone()) {
        return Ok(Value::from(f.abs()));
    }
    Err(Error::new(ErrorKind::InvalidOperation, format!("abs expects a number, got {}", v.kind())))
}
