use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use redraft_core::error::{RedraftError, Result};

/// How a node's update to a field is combined with the field's current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The new value replaces the old one.
    #[default]
    Overwrite,
    /// The new value is appended to an ordered sequence. An array update is
    /// appended element by element.
    Accumulate,
}

/// The fixed set of fields a graph's state may hold, with a merge policy each.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: BTreeMap<String, MergePolicy>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with an explicit policy.
    pub fn field(mut self, name: impl Into<String>, policy: MergePolicy) -> Self {
        self.fields.insert(name.into(), policy);
        self
    }

    pub fn overwrite(self, name: impl Into<String>) -> Self {
        self.field(name, MergePolicy::Overwrite)
    }

    pub fn accumulate(self, name: impl Into<String>) -> Self {
        self.field(name, MergePolicy::Accumulate)
    }

    pub fn policy(&self, name: &str) -> Option<MergePolicy> {
        self.fields.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// A node's returned subset of fields, merged into the state by the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialState {
    values: BTreeMap<String, Value>,
}

impl PartialState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }
}

/// The evolving state of one run.
///
/// Values are never mutated in place: [`WorkflowState::apply`] returns a new
/// snapshot, so earlier snapshots handed to observers stay valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    data: BTreeMap<String, Value>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used to assemble an initial state.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    /// A sequence field as strings; non-string elements are skipped.
    pub fn get_str_list(&self, key: &str) -> Vec<&str> {
        str_list(self.data.get(key))
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Check that every field is declared and every accumulate field holds a sequence.
    pub fn validate(&self, schema: &StateSchema) -> Result<()> {
        for (key, value) in &self.data {
            match schema.policy(key) {
                None => {
                    return Err(RedraftError::Config(format!(
                        "initial state field '{}' is not declared in the schema",
                        key
                    )))
                }
                Some(MergePolicy::Accumulate) if !value.is_array() => {
                    return Err(RedraftError::Config(format!(
                        "accumulate field '{}' must start as a sequence",
                        key
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Merge a partial update according to the schema, producing a new snapshot.
    pub fn apply(&self, update: &PartialState, schema: &StateSchema) -> Result<WorkflowState> {
        let mut next = self.clone();
        for (key, value) in update.iter() {
            let policy = schema.policy(key).ok_or_else(|| RedraftError::MergeType {
                field: key.clone(),
                message: "field is not declared in the schema".into(),
            })?;

            match policy {
                MergePolicy::Overwrite => {
                    next.data.insert(key.clone(), value.clone());
                }
                MergePolicy::Accumulate => {
                    let slot = next
                        .data
                        .entry(key.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    let items = slot.as_array_mut().ok_or_else(|| RedraftError::MergeType {
                        field: key.clone(),
                        message: "accumulate field does not hold a sequence".into(),
                    })?;
                    match value {
                        Value::Array(values) => items.extend(values.iter().cloned()),
                        other => items.push(other.clone()),
                    }
                }
            }
        }
        Ok(next)
    }

    /// A read-only copy restricted to `keys`.
    pub fn view(&self, keys: &[String]) -> StateView {
        let data = keys
            .iter()
            .filter_map(|k| self.data.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        StateView { data }
    }
}

/// The fields a node is allowed to read, copied out of the run's state.
#[derive(Debug, Clone, Default)]
pub struct StateView {
    data: BTreeMap<String, Value>,
}

impl StateView {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    pub fn get_str_list(&self, key: &str) -> Vec<&str> {
        str_list(self.data.get(key))
    }

    /// A string input the stage cannot work without.
    pub fn require_str(&self, stage: &str, key: &str) -> Result<&str> {
        self.get_str(key).ok_or_else(|| RedraftError::MalformedOutput {
            stage: stage.to_string(),
            message: format!("required input '{}' is absent", key),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

fn str_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> StateSchema {
        StateSchema::new()
            .overwrite("draft")
            .accumulate("content")
            .overwrite("revision_count")
    }

    #[test]
    fn test_overwrite_keeps_last_value() {
        let state = WorkflowState::new();
        let s1 = state
            .apply(&PartialState::new().with("draft", "first"), &schema())
            .unwrap();
        let s2 = s1
            .apply(&PartialState::new().with("draft", "second"), &schema())
            .unwrap();

        assert_eq!(s2.get_str("draft"), Some("second"));
        // Earlier snapshots are untouched.
        assert_eq!(s1.get_str("draft"), Some("first"));
        assert_eq!(state.get("draft"), None);
    }

    #[test]
    fn test_accumulate_appends_in_call_order() {
        let state = WorkflowState::new();
        let s1 = state
            .apply(&PartialState::new().with("content", json!(["a"])), &schema())
            .unwrap();
        let s2 = s1
            .apply(&PartialState::new().with("content", "b"), &schema())
            .unwrap();

        assert_eq!(s2.get_str_list("content"), vec!["a", "b"]);
        assert_eq!(s1.get_str_list("content"), vec!["a"]);
    }

    #[test]
    fn test_accumulate_into_non_sequence_fails() {
        let state = WorkflowState::new().with("content", "oops");
        let err = state
            .apply(&PartialState::new().with("content", "b"), &schema())
            .unwrap_err();
        assert!(matches!(err, RedraftError::MergeType { ref field, .. } if field == "content"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = WorkflowState::new()
            .apply(&PartialState::new().with("secret", 1), &schema())
            .unwrap_err();
        assert!(matches!(err, RedraftError::MergeType { .. }));
    }

    #[test]
    fn test_validate_initial_state() {
        assert!(WorkflowState::new()
            .with("draft", "x")
            .with("content", json!([]))
            .validate(&schema())
            .is_ok());
        assert!(WorkflowState::new()
            .with("unknown", 1)
            .validate(&schema())
            .unwrap_err()
            .is_configuration());
        assert!(WorkflowState::new()
            .with("content", "not a list")
            .validate(&schema())
            .is_err());
    }

    #[test]
    fn test_view_is_restricted() {
        let state = WorkflowState::new()
            .with("draft", "text")
            .with("revision_count", 2);
        let view = state.view(&["draft".to_string(), "critique".to_string()]);

        assert_eq!(view.get_str("draft"), Some("text"));
        assert!(!view.contains("revision_count"));
        assert!(!view.contains("critique"));
        assert!(matches!(
            view.require_str("review", "critique"),
            Err(RedraftError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_partial_state_to_json() {
        let update = PartialState::new().with("draft", "d").with("revision_count", 1);
        assert_eq!(update.to_json(), json!({"draft": "d", "revision_count": 1}));
        assert_eq!(update.keys().collect::<Vec<_>>(), vec!["draft", "revision_count"]);
    }
}
