//! Records, headers and field values.
//!
//! A [`Record`] is an ordered tuple of [`Value`]s paired with the [`Header`]
//! that names its fields. Headers are reference counted so the millions of
//! records coming out of a source share one allocation.

use anyhow::{Result, bail};
use std::fmt;
use std::sync::Arc;

/// One scalar field of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    /// A planar point (longitude/latitude or projected x/y).
    Point { x: f64, y: f64 },
    /// A bracketed list of scalars, e.g. the node ids of a road.
    List(Vec<Value>),
}

impl Value {
    /// Infer a value from one delimited-text field.
    ///
    /// Empty text is `Null`; integers and floats are recognised first, then
    /// `POINT (x y)` and `[a, b, ...]`; everything else is kept as a string.
    #[must_use]
    pub fn parse(text: &str) -> Value {
        let t = text.trim();
        if t.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = t.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = t.parse::<f64>() {
            return Value::Float(f);
        }
        if let Some(p) = parse_point(t) {
            return p;
        }
        if let Some(inner) = t.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let inner = inner.trim();
            if inner.is_empty() {
                return Value::List(Vec::new());
            }
            return Value::List(
                inner
                    .split(',')
                    .map(|item| Value::parse(item.trim().trim_matches(|c| c == '\'' || c == '"')))
                    .collect(),
            );
        }
        Value::Str(text.to_string())
    }

    /// Numeric view of `Int` and `Float` values.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn parse_point(t: &str) -> Option<Value> {
    let head = t.get(..5)?;
    if !head.eq_ignore_ascii_case("point") {
        return None;
    }
    let body = t[5..].trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut coords = body.split_whitespace();
    let x = coords.next()?.parse::<f64>().ok()?;
    let y = coords.next()?.parse::<f64>().ok()?;
    if coords.next().is_some() {
        return None;
    }
    Some(Value::Point { x, y })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            // Debug keeps the fractional part so the field reads back as a float.
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => f.write_str(s),
            Value::Point { x, y } => write!(f, "POINT ({x:?} {y:?})"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered field names shared by all records of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Arc<[String]>,
}

impl Header {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// One row flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    header: Header,
    values: Vec<Value>,
}

impl Record {
    /// Build a record, checking that `values` matches the header's arity.
    ///
    /// # Errors
    /// Returns an error when the number of values differs from the header.
    pub fn new(header: Header, values: Vec<Value>) -> Result<Self> {
        if header.len() != values.len() {
            bail!(
                "record has {} values but header declares {} fields",
                values.len(),
                header.len()
            );
        }
        Ok(Self { header, values })
    }

    /// Build a record with its own header from `(name, value)` pairs.
    pub fn from_pairs<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        let (names, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), v.into()))
            .unzip();
        Self {
            header: Header::new(names),
            values,
        }
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.header.index_of(name).map(|i| &self.values[i])
    }

    /// Copy of this record with field `name` replaced by `value`.
    ///
    /// # Errors
    /// Returns an error when the header has no field called `name`.
    pub fn with_value(&self, name: &str, value: Value) -> Result<Self> {
        let Some(i) = self.header.index_of(name) else {
            bail!("record has no field '{name}'");
        };
        let mut values = self.values.clone();
        values[i] = value;
        Ok(Self {
            header: self.header.clone(),
            values,
        })
    }

    /// Keep only the named fields, in the given order.
    ///
    /// # Errors
    /// Returns an error when any of `fields` is not in the header.
    pub fn project(&self, fields: &[String]) -> Result<Self> {
        let mut values = Vec::with_capacity(fields.len());
        for name in fields {
            match self.get(name) {
                Some(v) => values.push(v.clone()),
                None => bail!("record has no field '{name}'"),
            }
        }
        Ok(Self {
            header: Header::new(fields.iter().cloned()),
            values,
        })
    }
}
