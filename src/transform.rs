//! Per-record transforms.
//!
//! A transform maps one input [`Record`] to a [`TransformOutput`]: a single
//! record, several records (only for jobs that allow expansion), or nothing.
//! Transforms must be pure functions of their input, since chunks are handed
//! to independent workers with no shared mutable state.
//!
//! Transforms are usually described as data with [`TransformSpec`], a tagged
//! enum that can be stored in config files. Built-in strategies resolve
//! directly; anything else goes through a [`TransformRegistry`] under a
//! registered name plus JSON parameters. In-process closures can still be used
//! via [`FnTransform`].
//!
//! ```
//! use chunkline::transform::{TransformRegistry, TransformSpec};
//!
//! let spec: TransformSpec =
//!     serde_json::from_str(r#"{"kind":"discard_below","field":"v","threshold":0.0}"#).unwrap();
//! let t = TransformRegistry::new().resolve(&spec).unwrap();
//! # let _ = t;
//! ```

use crate::record::{Record, Value};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The result of transforming one record.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    One(Record),
    Many(Vec<Record>),
    Discard,
}

impl TransformOutput {
    /// Number of output rows this result contributes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            TransformOutput::One(_) => 1,
            TransformOutput::Many(rs) => rs.len(),
            TransformOutput::Discard => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the output rows to `out`.
    pub fn extend_into(self, out: &mut Vec<Record>) {
        match self {
            TransformOutput::One(r) => out.push(r),
            TransformOutput::Many(rs) => out.extend(rs),
            TransformOutput::Discard => {}
        }
    }
}

/// A pure per-record transformation, shareable across worker threads.
pub trait RecordTransform: Send + Sync {
    /// Transform one record.
    ///
    /// # Errors
    /// Any error is fatal to the chunk, and therefore to the job.
    fn apply(&self, record: Record) -> Result<TransformOutput>;
}

/// Adapter turning a closure into a [`RecordTransform`].
pub struct FnTransform<F>(pub F);

impl<F> RecordTransform for FnTransform<F>
where
    F: Fn(Record) -> Result<TransformOutput> + Send + Sync,
{
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        (self.0)(record)
    }
}

impl<F> fmt::Debug for FnTransform<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnTransform")
    }
}

/// Serializable description of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Pass every record through unchanged.
    Identity,
    /// Keep records whose numeric `field` is `>= threshold`; others
    /// (including non-numeric and null values) are discarded.
    DiscardBelow { field: String, threshold: f64 },
    /// Emit one record per element of the list in `field`, with the list
    /// replaced by the element. Scalars pass through as a single record.
    ExpandList { field: String },
    /// Keep only the named fields, in order.
    Project { fields: Vec<String> },
    /// Apply several transforms in sequence.
    Chain { steps: Vec<TransformSpec> },
    /// A transform registered by name in a [`TransformRegistry`].
    Registered {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl TransformSpec {
    /// Whether this spec can produce more than one row per input record.
    /// Registered transforms are trusted to declare this on the job instead.
    #[must_use]
    pub fn may_expand(&self) -> bool {
        match self {
            TransformSpec::ExpandList { .. } => true,
            TransformSpec::Chain { steps } => steps.iter().any(TransformSpec::may_expand),
            _ => false,
        }
    }
}

/// Builds a transform from the JSON parameters of a registered spec.
pub type TransformFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn RecordTransform>> + Send + Sync>;

/// Name-to-factory table used to resolve [`TransformSpec::Registered`].
#[derive(Clone, Default)]
pub struct TransformRegistry {
    factories: HashMap<String, TransformFactory>,
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn RecordTransform>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Turn a spec into an executable transform.
    ///
    /// # Errors
    /// Returns an error for unknown registered names or when a factory
    /// rejects its parameters.
    pub fn resolve(&self, spec: &TransformSpec) -> Result<Arc<dyn RecordTransform>> {
        let transform: Arc<dyn RecordTransform> = match spec {
            TransformSpec::Identity => Arc::new(Identity),
            TransformSpec::DiscardBelow { field, threshold } => Arc::new(DiscardBelow {
                field: field.clone(),
                threshold: *threshold,
            }),
            TransformSpec::ExpandList { field } => Arc::new(ExpandList {
                field: field.clone(),
            }),
            TransformSpec::Project { fields } => Arc::new(Project {
                fields: fields.clone(),
            }),
            TransformSpec::Chain { steps } => Arc::new(Chain {
                steps: steps.iter().map(|s| self.resolve(s)).collect::<Result<_>>()?,
            }),
            TransformSpec::Registered { name, params } => {
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| anyhow!("no transform registered as '{name}'"))?;
                factory(params).with_context(|| format!("build registered transform '{name}'"))?
            }
        };
        Ok(transform)
    }
}

struct Identity;

impl RecordTransform for Identity {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        Ok(TransformOutput::One(record))
    }
}

struct DiscardBelow {
    field: String,
    threshold: f64,
}

impl RecordTransform for DiscardBelow {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        let Some(value) = record.get(&self.field).map(Value::as_f64) else {
            bail!("record has no field '{}'", self.field);
        };
        match value {
            Some(v) if v >= self.threshold => Ok(TransformOutput::One(record)),
            _ => Ok(TransformOutput::Discard),
        }
    }
}

struct ExpandList {
    field: String,
}

impl RecordTransform for ExpandList {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        let items = match record.get(&self.field) {
            None => bail!("record has no field '{}'", self.field),
            Some(Value::List(items)) => Some(items.clone()),
            Some(_) => None,
        };
        let Some(items) = items else {
            return Ok(TransformOutput::One(record));
        };
        let out = items
            .into_iter()
            .map(|item| record.with_value(&self.field, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(TransformOutput::Many(out))
    }
}

struct Project {
    fields: Vec<String>,
}

impl RecordTransform for Project {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        Ok(TransformOutput::One(record.project(&self.fields)?))
    }
}

struct Chain {
    steps: Vec<Arc<dyn RecordTransform>>,
}

impl RecordTransform for Chain {
    fn apply(&self, record: Record) -> Result<TransformOutput> {
        let mut current = vec![record];
        let mut expanded = false;
        for step in &self.steps {
            let mut next = Vec::with_capacity(current.len());
            for r in current {
                let out = step.apply(r)?;
                expanded |= matches!(out, TransformOutput::Many(_));
                out.extend_into(&mut next);
            }
            current = next;
        }
        Ok(match (expanded, current.len()) {
            (true, _) => TransformOutput::Many(current),
            (false, 0) => TransformOutput::Discard,
            (false, _) => TransformOutput::One(current.remove(0)),
        })
    }
}
