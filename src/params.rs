//! Parameter trees and layered execution parameters.
//!
//! [`Params`] is a thin wrapper over a JSON value: the unit of configuration
//! attached to vertices, condition branches, and whole runs. [`ExecParams`]
//! is the view a processor sees while executing — an ordered stack of
//! parameter layers (selected branch args, then the vertex's own args, then
//! the caller's run params) where the first layer containing a path wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A parameter tree. Paths use `.` separators and may carry a leading `$`
/// (stripped on lookup), matching the expression syntax used by condition
/// gates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(pub Value);

impl Params {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Params(value)
    }

    /// True when the tree holds no data at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Navigate a dotted path. Returns `None` when any segment is missing.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = path.strip_prefix('$').unwrap_or(path);
        let mut cursor = &self.0;
        for segment in path.split('.') {
            cursor = cursor.get(segment)?;
        }
        Some(cursor)
    }

    /// Insert a top-level key, promoting a null root to an object.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if !self.0.is_object() {
            self.0 = Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.0.as_object_mut() {
            map.insert(key.into(), value);
        }
    }

    #[must_use]
    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    #[must_use]
    pub fn i64_at(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    #[must_use]
    pub fn f64_at(&self, path: &str) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    /// Boolean lookup with light coercion: JSON booleans, the strings
    /// `"true"`/`"false"`/`"1"`/`"0"`, and integers (non-zero is true).
    #[must_use]
    pub fn bool_at(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Params(value)
    }
}

/// Layered parameter view passed to [`Processor::execute`].
///
/// Layers are searched front to back; the first layer containing the
/// requested path shadows the rest.
///
/// [`Processor::execute`]: crate::processor::Processor::execute
#[derive(Clone, Debug, Default)]
pub struct ExecParams {
    layers: Vec<Arc<Params>>,
}

impl ExecParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer with lower precedence than all existing layers.
    pub fn push_layer(&mut self, layer: Arc<Params>) {
        if !layer.is_empty() {
            self.layers.push(layer);
        }
    }

    #[must_use]
    pub fn with_layer(mut self, layer: Arc<Params>) -> Self {
        self.push_layer(layer);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Append all of `other`'s layers below the existing ones.
    pub fn extend(&mut self, other: &ExecParams) {
        self.layers.extend(other.layers.iter().cloned());
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| layer.get(path))
    }

    #[must_use]
    pub fn str_or<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        self.layers
            .iter()
            .find_map(|layer| layer.str_at(path))
            .unwrap_or(default)
    }

    #[must_use]
    pub fn i64_or(&self, path: &str, default: i64) -> i64 {
        self.layers
            .iter()
            .find_map(|layer| layer.i64_at(path))
            .unwrap_or(default)
    }

    #[must_use]
    pub fn f64_or(&self, path: &str, default: f64) -> f64 {
        self.layers
            .iter()
            .find_map(|layer| layer.f64_at(path))
            .unwrap_or(default)
    }

    #[must_use]
    pub fn bool_or(&self, path: &str, default: bool) -> bool {
        self.layers
            .iter()
            .find_map(|layer| layer.bool_at(path))
            .unwrap_or(default)
    }
}
