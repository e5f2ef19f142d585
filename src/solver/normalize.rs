//! Coercion of executed results into JSON-safe answers.
//!
//! The executor harness does not ship the Python object itself across the
//! process boundary. It prints a [`ResultProbe`] describing what the object
//! exposes, and [`normalize`] picks the answer from it in priority order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A submitted answer. Always a string, number or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Answer {
    pub fn text(s: impl Into<String>) -> Self {
        Answer::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Answer::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Primitive JSON values map directly; everything else has no answer form.
    fn from_primitive(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Answer::Bool(*b)),
            Value::Number(n) => Some(Answer::Number(n.clone())),
            Value::String(s) => Some(Answer::Text(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Answer::Bool(b) => write!(f, "{}", b),
            Answer::Number(n) => write!(f, "{}", n),
            Answer::Text(s) => f.write_str(s),
        }
    }
}

/// What the harness learned about the `result` variable.
///
/// Every field is optional; the harness fills in whichever capabilities the
/// object has.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultProbe {
    /// Python type name, for logs
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// `.text` of a response-like object
    #[serde(default)]
    pub text: Option<String>,
    /// `.status_code` of a response-like object
    #[serde(default)]
    pub status_code: Option<i64>,
    /// Return value of `.item()` (numeric wrapper types)
    #[serde(default)]
    pub item: Option<Value>,
    /// Return value of `.to_dict()` (tabular objects)
    #[serde(default)]
    pub table: Option<Value>,
    /// The value itself when it is directly JSON-encodable
    #[serde(default)]
    pub value: Option<Value>,
    /// `str(result)`
    #[serde(default)]
    pub repr: Option<String>,
}

impl ResultProbe {
    /// Probe for a plain JSON value (used by tests and fakes).
    pub fn from_value(value: Value) -> Self {
        let repr = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            value: Some(value),
            repr: Some(repr),
            ..Default::default()
        }
    }
}

/// Raw outcome of running generated code.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAnswer {
    /// `result` was set; here is what it looks like
    Probe(ResultProbe),
    /// Anything that went wrong, already phrased as an answer string
    Error(String),
}

/// Reduce a raw execution outcome to a submittable answer.
///
/// Priority: response text, then scalar extraction, then stringified table,
/// then the value itself if primitive, then its string form.
pub fn normalize(raw: &RawAnswer) -> Answer {
    let probe = match raw {
        RawAnswer::Error(message) => return Answer::text(message.clone()),
        RawAnswer::Probe(probe) => probe,
    };

    if let (Some(text), Some(_)) = (&probe.text, probe.status_code) {
        return Answer::text(text.clone());
    }

    if let Some(item) = &probe.item {
        if let Some(answer) = Answer::from_primitive(item) {
            return answer;
        }
        return Answer::text(item.to_string());
    }

    if let Some(table) = &probe.table {
        return Answer::text(table.to_string());
    }

    if let Some(answer) = probe.value.as_ref().and_then(Answer::from_primitive) {
        return answer;
    }

    match (&probe.repr, &probe.value) {
        (Some(repr), _) => Answer::text(repr.clone()),
        (None, Some(value)) => Answer::text(value.to_string()),
        (None, None) => Answer::text("None"),
    }
}
