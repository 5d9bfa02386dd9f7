//! Partial-update documents.
//!
//! A [`PatchSpec`] mutates an in-memory model; the repository then persists only
//! the columns whose values changed. Three flavours are provided:
//!
//! - any closure `Fn(&mut M)`;
//! - [`JsonPatch`]: the RFC 6902 operations `add`, `replace`, `remove` and `test`
//!   on top-level members (`/name`);
//! - [`MergePatch`]: an RFC 7386 merge document.
//!
//! The JSON flavours go through the model's serde representation, so field names
//! follow the model's `Serialize`/`Deserialize` derives.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reasons a patch document cannot be applied.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid patch path '{0}': only top-level members are supported")]
    InvalidPath(String),

    #[error("path '{0}' does not exist")]
    MissingPath(String),

    #[error("test failed for path '{0}'")]
    TestFailed(String),

    #[error("patched document does not match the entity shape: {0}")]
    Shape(#[source] serde_json::Error),

    #[error("patch rejected: {0}")]
    Rejected(String),
}

/// Something that can modify a model in place.
pub trait PatchSpec<M>: Send + Sync {
    /// Apply the patch to `target`.
    ///
    /// # Errors
    /// Returns [`PatchError`] when the document cannot be applied; `target` may be
    /// left partially modified and must then be discarded.
    fn apply_to(&self, target: &mut M) -> Result<(), PatchError>;
}

impl<M, F> PatchSpec<M> for F
where
    F: Fn(&mut M) + Send + Sync,
{
    fn apply_to(&self, target: &mut M) -> Result<(), PatchError> {
        self(target);
        Ok(())
    }
}

/// One RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
    Test { path: String, value: Value },
}

/// RFC 6902 document restricted to top-level members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPatch(pub Vec<PatchOperation>);

impl JsonPatch {
    #[must_use]
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        Self(operations)
    }

    /// Parse a JSON array of operations.
    ///
    /// # Errors
    /// Returns [`PatchError::Shape`] when the document is not a valid operation list.
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        serde_json::from_value(value).map_err(PatchError::Shape)
    }

    #[must_use]
    pub fn replace(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(PatchOperation::Replace {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn test(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(PatchOperation::Test {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    fn apply_json(&self, doc: &mut Map<String, Value>) -> Result<(), PatchError> {
        for op in &self.0 {
            match op {
                PatchOperation::Add { path, value } => {
                    doc.insert(member(path)?.to_owned(), value.clone());
                }
                PatchOperation::Replace { path, value } => {
                    let slot = doc
                        .get_mut(member(path)?)
                        .ok_or_else(|| PatchError::MissingPath(path.clone()))?;
                    *slot = value.clone();
                }
                PatchOperation::Remove { path } => {
                    // Removing a member of a struct means resetting it to null;
                    // non-optional fields then fail deserialization.
                    let slot = doc
                        .get_mut(member(path)?)
                        .ok_or_else(|| PatchError::MissingPath(path.clone()))?;
                    *slot = Value::Null;
                }
                PatchOperation::Test { path, value } => {
                    let current = doc
                        .get(member(path)?)
                        .ok_or_else(|| PatchError::MissingPath(path.clone()))?;
                    if current != value {
                        return Err(PatchError::TestFailed(path.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Extract the member name from a `/name` pointer.
fn member(path: &str) -> Result<&str, PatchError> {
    let name = path
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or_else(|| PatchError::InvalidPath(path.to_owned()))?;
    if name.contains('~') {
        // `~0` / `~1` escapes never occur in a model field name.
        return Err(PatchError::InvalidPath(path.to_owned()));
    }
    Ok(name)
}

/// RFC 7386 merge document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergePatch(pub Value);

fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(doc) = target {
        for (key, value) in entries {
            if value.is_null() {
                doc.remove(key);
            } else {
                merge(doc.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn to_object<M: Serialize>(target: &M) -> Result<Map<String, Value>, PatchError> {
    match serde_json::to_value(target).map_err(PatchError::Shape)? {
        Value::Object(map) => Ok(map),
        _ => Err(PatchError::Rejected(
            "entity does not serialize to a JSON object".to_owned(),
        )),
    }
}

impl<M> PatchSpec<M> for JsonPatch
where
    M: Serialize + DeserializeOwned,
{
    fn apply_to(&self, target: &mut M) -> Result<(), PatchError> {
        let mut doc = to_object(target)?;
        self.apply_json(&mut doc)?;
        *target = serde_json::from_value(Value::Object(doc)).map_err(PatchError::Shape)?;
        Ok(())
    }
}

impl<M> PatchSpec<M> for MergePatch
where
    M: Serialize + DeserializeOwned,
{
    fn apply_to(&self, target: &mut M) -> Result<(), PatchError> {
        if !self.0.is_object() {
            return Err(PatchError::Rejected(
                "merge patch must be a JSON object".to_owned(),
            ));
        }
        let mut doc = Value::Object(to_object(target)?);
        merge(&mut doc, &self.0);
        *target = serde_json::from_value(doc).map_err(PatchError::Shape)?;
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        note: Option<String>,
        count: i32,
    }

    fn doc() -> Doc {
        Doc {
            name: "a".to_owned(),
            note: Some("n".to_owned()),
            count: 1,
        }
    }

    #[test]
    fn replace_and_test() {
        let mut d = doc();
        JsonPatch::default()
            .test("/count", 1)
            .replace("/name", "b")
            .apply_to(&mut d)
            .unwrap();
        assert_eq!(d.name, "b");
        assert_eq!(d.count, 1);
    }

    #[test]
    fn failed_test_reports_path() {
        let mut d = doc();
        let err = JsonPatch::default()
            .test("/count", 2)
            .apply_to(&mut d)
            .unwrap_err();
        assert!(matches!(err, PatchError::TestFailed(p) if p == "/count"));
    }

    #[test]
    fn nested_paths_are_rejected() {
        let mut d = doc();
        let err = JsonPatch::default()
            .replace("/name/first", "x")
            .apply_to(&mut d)
            .unwrap_err();
        assert!(matches!(err, PatchError::InvalidPath(_)));
    }

    #[test]
    fn type_mismatch_is_shape_error() {
        let mut d = doc();
        let err = JsonPatch::default()
            .replace("/count", "many")
            .apply_to(&mut d)
            .unwrap_err();
        assert!(matches!(err, PatchError::Shape(_)));
    }

    #[test]
    fn remove_optional_member() {
        let mut d = doc();
        let patch = JsonPatch::from_value(json!([{ "op": "remove", "path": "/note" }])).unwrap();
        patch.apply_to(&mut d).unwrap();
        assert_eq!(d.note, None);
    }

    #[test]
    fn merge_patch_sets_and_clears() {
        let mut d = doc();
        MergePatch(json!({ "count": 5, "note": null }))
            .apply_to(&mut d)
            .unwrap();
        assert_eq!(d.count, 5);
        assert_eq!(d.note, None);
        assert_eq!(d.name, "a");
    }

    #[test]
    fn closure_patch() {
        let mut d = doc();
        let patch = |d: &mut Doc| d.count += 10;
        PatchSpec::apply_to(&patch, &mut d).unwrap();
        assert_eq!(d.count, 11);
    }
}
