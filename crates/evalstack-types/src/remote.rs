use facet::Facet;
use std::fmt;

use crate::RemoteObjectId;

/// Name given to exceptions whose thrown value carries no name of its own.
pub const GENERIC_ERROR_NAME: &str = "Error";

/// One entry of a stack trace as reported by the remote engine.
///
/// `line` and `column` are kept exactly as the engine reports them; the
/// composer renders them verbatim.
#[derive(Facet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFrame {
    /// Empty for anonymous functions.
    pub function_name: String,
    /// Script the frame executes in.
    pub url: String,
    pub line: u32,
    pub column: u32,
}

impl RemoteFrame {
    pub fn new(
        function_name: impl Into<String>,
        url: impl Into<String>,
        line: u32,
        column: u32,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            url: url.into(),
            line,
            column,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.function_name.is_empty()
    }
}

#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// The thrown value is an `Error` instance (or subclass).
    ErrorLike,
    /// Anything else: plain objects, primitives, `Response`s, ...
    OpaqueValue,
}

/// A value living in, or serialized out of, the remote context.
#[derive(Facet, Debug, Clone, PartialEq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum RemoteValue {
    Undefined,
    /// JSON-representable value transferred by value.
    Value(facet_value::Value),
    /// Reference to an object that stays in the remote context.
    Object(RemoteObject),
}

impl RemoteValue {
    pub fn null() -> Self {
        Self::Value(facet_value::Value::NULL)
    }

    pub fn object_id(&self) -> Option<&RemoteObjectId> {
        match self {
            Self::Object(object) => Some(&object.object_id),
            _ => None,
        }
    }
}

impl From<facet_value::Value> for RemoteValue {
    fn from(value: facet_value::Value) -> Self {
        Self::Value(value)
    }
}

impl From<i64> for RemoteValue {
    fn from(value: i64) -> Self {
        Self::Value(value.into())
    }
}

impl From<f64> for RemoteValue {
    fn from(value: f64) -> Self {
        Self::Value(value.into())
    }
}

impl From<String> for RemoteValue {
    fn from(value: String) -> Self {
        Self::Value(value.into())
    }
}

impl From<&str> for RemoteValue {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<RemoteObject> for RemoteValue {
    fn from(object: RemoteObject) -> Self {
        Self::Object(object)
    }
}

/// Renders the value the way the remote engine would stringify it.
impl fmt::Display for RemoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Value(value) => {
                let Ok(json) = facet_json::to_string(value) else {
                    return f.write_str("[unserializable value]");
                };
                if json.starts_with('"') {
                    if let Ok(text) = facet_json::from_str::<String>(&json) {
                        return f.write_str(&text);
                    }
                }
                f.write_str(&json)
            }
            Self::Object(object) => match &object.description {
                Some(description) => f.write_str(description),
                None => write!(f, "[object {}]", object.class_name),
            },
        }
    }
}

#[derive(Facet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObject {
    pub object_id: RemoteObjectId,
    /// Constructor name, e.g. `Object`, `Response`, `HTMLDivElement`.
    pub class_name: String,
    pub description: Option<String>,
}

/// Exception state reported by the remote context when evaluation throws
/// or when a promise rejects with nobody listening.
#[derive(Facet, Debug, Clone, PartialEq)]
pub struct RemoteException {
    pub kind: ExceptionKind,
    pub name: String,
    pub message: String,
    /// Innermost frame first.
    pub raw_stack: Vec<RemoteFrame>,
    pub opaque_value: Option<RemoteValue>,
}

impl RemoteException {
    pub fn error(
        name: impl Into<String>,
        message: impl Into<String>,
        raw_stack: Vec<RemoteFrame>,
    ) -> Self {
        Self {
            kind: ExceptionKind::ErrorLike,
            name: name.into(),
            message: message.into(),
            raw_stack,
            opaque_value: None,
        }
    }

    /// A thrown or rejected value that is not an `Error`. Name and message are
    /// synthesized from the value itself.
    pub fn opaque(value: RemoteValue) -> Self {
        Self {
            kind: ExceptionKind::OpaqueValue,
            name: GENERIC_ERROR_NAME.to_string(),
            message: value.to_string(),
            raw_stack: Vec::new(),
            opaque_value: Some(value),
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ExceptionKind::OpaqueValue
    }
}
