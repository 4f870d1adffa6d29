//! JSON envelope model: requests, targets, AVUs, and access specs.
//!
//! A request envelope is a JSON object with an `operation` name, a `target`
//! object identifying the entity to act upon, and an optional `arguments`
//! object of per-operation switches. Responses annotate the *input* object
//! with either a `result` or an `error` property — never both — so unknown
//! keys supplied by the producer survive the round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GridError;

// Envelope keys
pub const OPERATION_KEY: &str = "operation";
pub const TARGET_KEY: &str = "target";
pub const ARGUMENTS_KEY: &str = "arguments";
pub const RESULT_KEY: &str = "result";
pub const ERROR_KEY: &str = "error";

/// An attribute/value/units metadata triple.
///
/// `units` is optional on both sides: an absent units string compares equal
/// to an empty one and is transmitted as `""` on modification. `operator`
/// selects the match comparator for searches and defaults to equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avu {
    pub attribute: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Access level applied per user/zone pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Null,
    Read,
    Write,
    Own,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Null => "null",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Own => "own",
        }
    }
}

/// A single permission entry in a `chmod` target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub level: AccessLevel,
}

/// The raw target object of an envelope.
///
/// Presence of `data_object` discriminates data-object targets from
/// collection targets; [`Target::classify`] performs that check once so the
/// primitives can match on the result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub data_object: Option<String>,
    #[serde(default)]
    pub avus: Option<Vec<Avu>>,
    #[serde(default)]
    pub access: Option<Vec<Access>>,
    /// Local directory for file transfers.
    #[serde(default)]
    pub directory: Option<String>,
    /// Local file name for file transfers.
    #[serde(default)]
    pub file: Option<String>,
}

/// A target resolved to exactly one of its legal shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPath {
    Collection(String),
    DataObject { collection: String, name: String },
}

impl TargetPath {
    /// The full catalog path of the entity.
    pub fn path(&self) -> String {
        match self {
            TargetPath::Collection(c) => c.clone(),
            TargetPath::DataObject { collection, name } => join_path(collection, name),
        }
    }

    pub fn is_data_object(&self) -> bool {
        matches!(self, TargetPath::DataObject { .. })
    }
}

/// Join a collection path and a data-object name without doubling slashes.
pub fn join_path(collection: &str, name: &str) -> String {
    if collection.ends_with('/') {
        format!("{collection}{name}")
    } else {
        format!("{collection}/{name}")
    }
}

impl Target {
    /// Parse a raw JSON target into its typed form.
    pub fn from_value(value: &Value) -> Result<Target, GridError> {
        serde_json::from_value(value.clone())
            .map_err(|e| GridError::invalid(format!("Malformed target: {e}")))
    }

    /// Classify the target as a collection or a data object.
    ///
    /// A data-object target requires both `collection` and `data_object`;
    /// a collection target has only `collection`. Anything else is an
    /// invalid-argument error.
    pub fn classify(&self) -> Result<TargetPath, GridError> {
        match (&self.collection, &self.data_object) {
            (Some(coll), Some(name)) => Ok(TargetPath::DataObject {
                collection: coll.clone(),
                name: name.clone(),
            }),
            (Some(coll), None) => Ok(TargetPath::Collection(coll.clone())),
            (None, Some(_)) => Err(GridError::invalid(
                "Target has a data_object but no collection",
            )),
            (None, None) => Err(GridError::invalid(
                "Target has neither collection nor data_object",
            )),
        }
    }

    /// True when the target names a data object.
    pub fn represents_data_object(&self) -> bool {
        self.data_object.is_some()
    }

    /// The local filesystem path for file-transfer targets.
    ///
    /// `directory` defaults to the working directory and `file` to the
    /// data-object name.
    pub fn local_path(&self) -> Result<std::path::PathBuf, GridError> {
        let file = self
            .file
            .clone()
            .or_else(|| self.data_object.clone())
            .ok_or_else(|| GridError::invalid("Target has no local file name"))?;
        let mut path = std::path::PathBuf::from(self.directory.as_deref().unwrap_or("."));
        path.push(file);
        Ok(path)
    }
}

/// The machine-readable error annotation added to failed envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: i32,
    pub message: String,
}

impl From<&GridError> for ErrorReport {
    fn from(e: &GridError) -> Self {
        ErrorReport {
            code: e.status(),
            message: e.to_string(),
        }
    }
}

// ─── Raw envelope accessors ──────────────────────────────────────────────────

/// True when the item carries an `operation` property.
pub fn has_operation(item: &Value) -> bool {
    item.get(OPERATION_KEY).is_some()
}

/// True when the item carries a `target` property.
pub fn has_target(item: &Value) -> bool {
    item.get(TARGET_KEY).is_some()
}

/// The envelope's operation name.
pub fn operation(item: &Value) -> Result<&str, GridError> {
    item.get(OPERATION_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| GridError::invalid("Envelope has no string 'operation' property"))
}

/// The envelope's raw target object.
pub fn target(item: &Value) -> Result<&Value, GridError> {
    let t = item
        .get(TARGET_KEY)
        .ok_or_else(|| GridError::invalid("Envelope has no 'target' property"))?;
    if !t.is_object() {
        return Err(GridError::invalid("Envelope 'target' is not a JSON object"));
    }
    Ok(t)
}

/// The envelope's `arguments` object, if present.
pub fn arguments(item: &Value) -> Result<Option<&Map<String, Value>>, GridError> {
    match item.get(ARGUMENTS_KEY) {
        None => Ok(None),
        Some(a) => a
            .as_object()
            .map(Some)
            .ok_or_else(|| GridError::invalid("Envelope 'arguments' is not a JSON object")),
    }
}

/// Attach a success result to the input envelope.
pub fn add_result(item: &mut Value, result: Value) -> Result<(), GridError> {
    let obj = item
        .as_object_mut()
        .ok_or_else(|| GridError::invalid("Cannot annotate a non-object item"))?;
    obj.insert(RESULT_KEY.to_owned(), result);
    Ok(())
}

/// Attach an error report to the input envelope.
pub fn add_error(item: &mut Value, error: &GridError) {
    if let Some(obj) = item.as_object_mut() {
        let report = ErrorReport::from(error);
        obj.insert(
            ERROR_KEY.to_owned(),
            serde_json::to_value(report).unwrap_or(Value::Null),
        );
    }
}
