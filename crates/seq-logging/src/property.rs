// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured values attached to events.
//!
//! Objects and arrays are shared, mutable handles: cloning a [`Property`]
//! clones the handle, not the contents. This lets applications hand the
//! logger the same graph they work with, including graphs that refer back
//! to themselves. Serialization therefore has to track node identity:
//!
//! - [`Property::to_json`] fails on the first node that is revisited along
//!   the branch being serialized.
//! - [`Property::sanitized`] replaces such a node with a marker string that
//!   names the path at which the node was first seen.
//!
//! Identity is tracked per branch, so two siblings that share a node are
//! serialized twice rather than being reported as a cycle.
//!
//! Nesting is bounded by [`MAX_PROPERTY_DEPTH`]: a node below that depth is
//! treated the same way as a cycle, with its own error and marker.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::constants::MAX_PROPERTY_DEPTH;
use crate::error::LoggerError;

/// Path of the properties object inside a wire record.
const ROOT_PATH: &str = "root.Properties";

/// Prefix removed from cycle paths to keep markers short.
const STRIPPED_PREFIX: &str = "root.Properties.";

pub type SharedArray = Arc<Mutex<Vec<Property>>>;
pub type SharedObject = Arc<Mutex<BTreeMap<String, Property>>>;

/// A loosely typed value supplied by the application.
#[derive(Clone)]
pub enum Property {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(SharedArray),
    Object(SharedObject),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn node_id<T>(node: &Arc<T>) -> usize {
    Arc::as_ptr(node).cast::<()>() as usize
}

fn short_path(path: &str) -> String {
    path.replacen(STRIPPED_PREFIX, "", 1)
}

/// Ancestors of the node being converted, with the path each was first seen at.
type Branch = Vec<(usize, String)>;

/// Why a compound node is not descended into.
enum Truncation<'a> {
    /// The node is its own ancestor, first seen at this path.
    Cycle(&'a str),
    /// The node sits at this path, below [`MAX_PROPERTY_DEPTH`].
    TooDeep(&'a str),
}

impl Truncation<'_> {
    fn into_error(self) -> LoggerError {
        match self {
            Truncation::Cycle(first_seen) => LoggerError::CircularStructure {
                path: short_path(first_seen),
            },
            Truncation::TooDeep(path) => LoggerError::PropertiesTooDeep {
                limit: MAX_PROPERTY_DEPTH,
                path: short_path(path),
            },
        }
    }

    fn marker(&self) -> Value {
        let marker = match self {
            Truncation::Cycle(first_seen) => {
                format!("== Circular structure: '{}' ==", short_path(first_seen))
            }
            Truncation::TooDeep(path) => {
                format!("== Maximum depth exceeded: '{}' ==", short_path(path))
            }
        };
        Value::String(marker)
    }
}

fn truncation<'a>(id: usize, path: &'a str, branch: &'a Branch) -> Option<Truncation<'a>> {
    if let Some((_, first_seen)) = branch.iter().find(|(seen, _)| *seen == id) {
        return Some(Truncation::Cycle(first_seen));
    }
    (branch.len() >= MAX_PROPERTY_DEPTH).then_some(Truncation::TooDeep(path))
}

impl Property {
    /// Creates an empty shared object.
    #[must_use]
    pub fn object() -> Self {
        Property::Object(Arc::new(Mutex::new(BTreeMap::new())))
    }

    /// Creates an empty shared array.
    #[must_use]
    pub fn array() -> Self {
        Property::Array(Arc::new(Mutex::new(Vec::new())))
    }

    /// Sets `key` on an object. Returns false when `self` is not an object.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Property>) -> bool {
        let Property::Object(map) = self else {
            return false;
        };
        let (key, value) = (key.into(), value.into());
        lock(map).insert(key, value);
        true
    }

    /// Appends to an array. Returns false when `self` is not an array.
    pub fn push(&self, value: impl Into<Property>) -> bool {
        let Property::Array(items) = self else {
            return false;
        };
        let value = value.into();
        lock(items).push(value);
        true
    }

    /// Returns a handle to the value stored under `key`, if `self` is an
    /// object holding one.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Property> {
        match self {
            Property::Object(map) => lock(map).get(key).cloned(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Property::Object(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Property::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Property::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Converts the graph to JSON, failing with
    /// [`LoggerError::CircularStructure`] if a node is its own ancestor and
    /// with [`LoggerError::PropertiesTooDeep`] if nesting goes past
    /// [`MAX_PROPERTY_DEPTH`].
    pub fn to_json(&self) -> Result<Value, LoggerError> {
        let mut branch = Branch::new();
        self.convert(ROOT_PATH, &mut branch, &mut |truncation| Err(truncation.into_error()))
    }

    /// Converts the graph to JSON, replacing every node that is its own
    /// ancestor with `"== Circular structure: '<path>' =="` and every node
    /// nested too deeply with `"== Maximum depth exceeded: '<path>' =="`.
    #[must_use]
    pub fn sanitized(&self) -> Value {
        let mut branch = Branch::new();
        let converted: Result<Value, Infallible> =
            self.convert(ROOT_PATH, &mut branch, &mut |truncation| Ok(truncation.marker()));
        match converted {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// String form used when a property stands in for a text field.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Property::String(s) => s.clone(),
            Property::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            other => other.sanitized().to_string(),
        }
    }

    fn convert<E>(
        &self,
        path: &str,
        branch: &mut Branch,
        on_truncate: &mut impl FnMut(Truncation<'_>) -> Result<Value, E>,
    ) -> Result<Value, E> {
        match self {
            Property::Null => Ok(Value::Null),
            Property::Bool(b) => Ok(Value::Bool(*b)),
            Property::Number(n) => Ok(Value::Number(n.clone())),
            Property::String(s) => Ok(Value::String(s.clone())),
            Property::Timestamp(ts) => Ok(Value::String(
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
            Property::Array(items) => {
                let id = node_id(items);
                if let Some(truncated) = truncation(id, path, branch) {
                    return on_truncate(truncated);
                }
                // Snapshot the handles so no lock is held while descending.
                let children: Vec<Property> = lock(items).clone();
                branch.push((id, path.to_string()));
                let mut out = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    let converted = child.convert(&format!("{path}[{i}]"), branch, on_truncate);
                    match converted {
                        Ok(value) => out.push(value),
                        Err(e) => {
                            branch.pop();
                            return Err(e);
                        }
                    }
                }
                branch.pop();
                Ok(Value::Array(out))
            }
            Property::Object(map) => {
                let id = node_id(map);
                if let Some(truncated) = truncation(id, path, branch) {
                    return on_truncate(truncated);
                }
                let children: Vec<(String, Property)> = lock(map)
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                branch.push((id, path.to_string()));
                let mut out = Map::new();
                for (key, child) in children {
                    let converted = child.convert(&format!("{path}.{key}"), branch, on_truncate);
                    match converted {
                        Ok(value) => {
                            out.insert(key, value);
                        }
                        Err(e) => {
                            branch.pop();
                            return Err(e);
                        }
                    }
                }
                branch.pop();
                Ok(Value::Object(out))
            }
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Null => write!(f, "Null"),
            Property::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Property::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Property::String(s) => f.debug_tuple("String").field(s).finish(),
            Property::Timestamp(ts) => f.debug_tuple("Timestamp").field(ts).finish(),
            // Compound nodes may be cyclic, print their sanitized form.
            Property::Array(_) => write!(f, "Array({})", self.sanitized()),
            Property::Object(_) => write!(f, "Object({})", self.sanitized()),
        }
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Property::Null,
            Value::Bool(b) => Property::Bool(b),
            Value::Number(n) => Property::Number(n),
            Value::String(s) => Property::String(s),
            Value::Array(items) => Property::Array(Arc::new(Mutex::new(
                items.into_iter().map(Property::from).collect(),
            ))),
            Value::Object(map) => Property::Object(Arc::new(Mutex::new(
                map.into_iter().map(|(k, v)| (k, Property::from(v))).collect(),
            ))),
        }
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::String(value.to_string())
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::String(value)
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Property::Bool(value)
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Property::Number(value.into())
    }
}

impl From<i32> for Property {
    fn from(value: i32) -> Self {
        Property::Number(value.into())
    }
}

impl From<u64> for Property {
    fn from(value: u64) -> Self {
        Property::Number(value.into())
    }
}

impl From<u32> for Property {
    fn from(value: u32) -> Self {
        Property::Number(value.into())
    }
}

impl From<usize> for Property {
    fn from(value: usize) -> Self {
        Property::Number(value.into())
    }
}

impl From<f64> for Property {
    /// Non-finite numbers have no JSON form and become `Null`.
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Property::Null, Property::Number)
    }
}

impl From<DateTime<Utc>> for Property {
    fn from(value: DateTime<Utc>) -> Self {
        Property::Timestamp(value)
    }
}

impl<T: Into<Property>> From<Vec<T>> for Property {
    fn from(values: Vec<T>) -> Self {
        Property::Array(Arc::new(Mutex::new(
            values.into_iter().map(Into::into).collect(),
        )))
    }
}
