use ahash::AHashMap;

use crate::{adapter, value::Value};

/// Read-only variable resolution for one evaluation.
///
/// Implementations must be cheap to query; `resolve` is called once per
/// identifier node evaluation.
pub trait Activation {
    /// Resolves a (fully-qualified) variable name to a value.
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// The empty activation: no variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyActivation;

impl Activation for EmptyActivation {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// An activation over eagerly-converted values.
#[derive(Debug, Clone, Default)]
pub struct MapActivation {
    values: AHashMap<String, Value>,
}

impl MapActivation {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }
}

impl Activation for MapActivation {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for MapActivation {
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(name, value)| (name.into(), value)).collect(),
        }
    }
}

/// An activation over host JSON bindings, converted lazily on first
/// resolution of each name.
#[derive(Debug, Clone, Default)]
pub struct JsonActivation {
    bindings: serde_json::Map<String, serde_json::Value>,
}

impl JsonActivation {
    pub fn new(bindings: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { bindings }
    }

    /// Parses a JSON object text into an activation.
    pub fn from_json_text(text: &str) -> Result<Self, serde_json::Error> {
        let bindings: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        Ok(Self { bindings })
    }
}

impl Activation for JsonActivation {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).map(adapter::json_to_value)
    }
}

/// A mutable layer over a parent activation.
///
/// Pushed by the evaluator for comprehension frames and `cel.bind`
/// bindings; rebinding a name (the accumulator on each loop step) replaces
/// the existing entry.
pub struct MutableActivation<'a> {
    parent: &'a dyn Activation,
    bindings: Vec<(String, Value)>,
}

impl<'a> MutableActivation<'a> {
    pub fn new(parent: &'a dyn Activation) -> Self {
        Self {
            parent,
            bindings: Vec::with_capacity(3),
        }
    }

    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.bindings.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.bindings.push((name.to_owned(), value));
        }
    }
}

impl Activation for MutableActivation<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .or_else(|| self.parent.resolve(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutable_layer_shadows_and_rebinds() {
        let base = MapActivation::new().with("x", Value::Int(1)).with("y", Value::Int(9));
        let mut frame = MutableActivation::new(&base);
        frame.set("x", Value::Int(2));
        assert!(matches!(frame.resolve("x"), Some(Value::Int(2))));
        assert!(matches!(frame.resolve("y"), Some(Value::Int(9))));
        frame.set("x", Value::Int(3));
        assert!(matches!(frame.resolve("x"), Some(Value::Int(3))));
    }

    #[test]
    fn json_activation_converts_lazily() {
        let activation = JsonActivation::from_json_text(r#"{"n": 3, "tags": ["a", "b"]}"#).unwrap();
        assert!(matches!(activation.resolve("n"), Some(Value::Int(3))));
        let Some(Value::List(tags)) = activation.resolve("tags") else {
            panic!("expected list");
        };
        assert_eq!(tags.len(), 2);
        assert!(activation.resolve("missing").is_none());
    }
}
