//! Run, thread and checkpoint data exchanged with the studio server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node marker that signals normal completion of a run.
pub const END_NODE: &str = "__END__";

/// Kind of input an argument expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArgType {
    /// Free text input.
    String,
    /// Image input.
    Image,
    /// Any type this client does not know how to collect.
    Other(String),
}

impl ArgType {
    /// Whether values of this type are collected from an input source.
    #[must_use]
    pub const fn is_collected(&self) -> bool {
        matches!(self, Self::String | Self::Image)
    }
}

impl From<String> for ArgType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STRING" => Self::String,
            "IMAGE" => Self::Image,
            _ => Self::Other(value),
        }
    }
}

impl From<ArgType> for String {
    fn from(value: ArgType) -> Self {
        match value {
            ArgType::String => "STRING".to_owned(),
            ArgType::Image => "IMAGE".to_owned(),
            ArgType::Other(other) => other,
        }
    }
}

/// Description of one expected run input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Argument name, used as the key in submitted form values.
    pub name: String,
    /// Expected input kind.
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    /// Whether a value must be supplied.
    #[serde(default)]
    pub required: bool,
}

impl ArgSpec {
    /// Create an optional argument spec.
    #[must_use]
    pub fn new(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: false,
        }
    }

    /// Mark this argument as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A thread known to the server at init time, serialized as `[id, entries]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry(pub String, pub Vec<Value>);

impl ThreadEntry {
    /// Thread identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Outputs already recorded on the thread.
    #[must_use]
    pub fn entries(&self) -> &[Value] {
        &self.1
    }
}

/// Body of the init response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitData {
    /// Run identifier assigned by the server.
    pub id: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Graph diagram source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
    /// Ordered input descriptions.
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// Threads the server already knows about.
    #[serde(default)]
    pub threads: Vec<ThreadEntry>,
}

/// Remote execution template. Immutable once initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Opaque run id.
    pub id: String,
    /// Ordered input descriptions.
    pub args: Vec<ArgSpec>,
}

impl From<&InitData> for Run {
    fn from(data: &InitData) -> Self {
        Self {
            id: data.id.clone(),
            args: data.args.clone(),
        }
    }
}

/// A resumable pause point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifier of the paused node.
    pub node: String,
    /// Opaque value sent back as the resume body.
    #[serde(default)]
    pub data: Value,
    /// Server-side checkpoint id, if the server reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

impl Checkpoint {
    /// Create a checkpoint without a server checkpoint id.
    #[must_use]
    pub fn new(node: impl Into<String>, data: Value) -> Self {
        Self {
            node: node.into(),
            data,
            checkpoint: None,
        }
    }

    /// Attach the server checkpoint id.
    #[must_use]
    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint = Some(id.into());
        self
    }
}

/// How a stream ended, read off its terminal tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The run reached `__END__`.
    Completed,
    /// The run paused at the given node.
    Interrupted { node: String },
}

/// Node output carried in the second element of a stream tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub node: String,
    #[serde(default)]
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// One decoded JSON value from a stream response.
///
/// No schema is enforced; the accessors only look for the
/// `[payload, {"node": ...}]` tuple shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamEvent(Value);

impl StreamEvent {
    /// Wrap a decoded value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.0
    }

    /// Consume into the raw value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    fn tuple(&self) -> Option<(&Value, &serde_json::Map<String, Value>)> {
        match self.0.as_array()?.as_slice() {
            [payload, Value::Object(marker)] => Some((payload, marker)),
            _ => None,
        }
    }

    /// First element of the tuple.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.tuple().map(|(payload, _)| payload)
    }

    /// The `node` marker, when this value has the tuple shape.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.tuple()?.1.get("node")?.as_str()
    }

    /// Classify this value as a terminal event.
    ///
    /// Any `[payload, {..}]` tuple is terminal. Only a `node` of `__END__`
    /// completes the run; any other marker, including a missing or
    /// non-string one, is an interruption at that node rendered as text.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        let (_, marker) = self.tuple()?;
        Some(match marker.get("node").unwrap_or(&Value::Null) {
            Value::String(node) if node == END_NODE => Termination::Completed,
            Value::String(node) => Termination::Interrupted { node: node.clone() },
            other => Termination::Interrupted {
                node: other.to_string(),
            },
        })
    }

    /// Typed view of the tuple's node output.
    #[must_use]
    pub fn node_output(&self) -> Option<NodeOutput> {
        let (_, marker) = self.tuple()?;
        serde_json::from_value(Value::Object(marker.clone())).ok()
    }
}

impl From<Value> for StreamEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Inbound notification pushed by an upstream live-update source.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The server assigned a new thread.
    ThreadUpdated(String),
    /// A node paused and can be resumed.
    NodeUpdated(Checkpoint),
}
