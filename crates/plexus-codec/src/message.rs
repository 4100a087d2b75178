use rmpv::Value;

use crate::CodecError;

/// A type that can travel as one frame.
pub trait WireMessage: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, CodecError>;
}

impl WireMessage for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(value)
    }
}

/// Client → server call. A missing `id` marks a fire-and-forget call.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: Option<String>,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }
}

impl WireMessage for Request {
    fn to_value(&self) -> Value {
        let mut entries = Vec::with_capacity(3);
        if let Some(id) = &self.id {
            entries.push((Value::from("id"), Value::from(id.as_str())));
        }
        entries.push((Value::from("method"), Value::from(self.method.as_str())));
        entries.push((Value::from("params"), Value::Array(self.params.clone())));
        Value::Map(entries)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let entries = into_map(value)?;
        let mut id = None;
        let mut method = None;
        let mut params = Vec::new();
        for (key, val) in entries {
            match key.as_str() {
                Some("id") => id = parse_id(val)?,
                Some("method") => match val {
                    Value::String(s) => method = s.into_str(),
                    _ => return Err(invalid("method must be a string")),
                },
                Some("params") => match val {
                    Value::Array(items) => params = items,
                    Value::Nil => {}
                    _ => return Err(invalid("params must be an array")),
                },
                _ => {}
            }
        }
        let method = method.ok_or_else(|| invalid("missing method"))?;
        Ok(Self { id, method, params })
    }
}

/// Server → client reply, or an unsolicited push when `id` is absent.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Server-originated event; carries no correlation id.
    pub fn push(event: Value) -> Self {
        Self::success(None, event)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl WireMessage for Response {
    fn to_value(&self) -> Value {
        let mut entries = Vec::with_capacity(2);
        if let Some(id) = &self.id {
            entries.push((Value::from("id"), Value::from(id.as_str())));
        }
        if let Some(result) = &self.result {
            entries.push((Value::from("result"), result.clone()));
        }
        if let Some(error) = &self.error {
            entries.push((Value::from("error"), Value::from(error.as_str())));
        }
        Value::Map(entries)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let entries = into_map(value)?;
        let mut response = Self {
            id: None,
            result: None,
            error: None,
        };
        for (key, val) in entries {
            match key.as_str() {
                Some("id") => response.id = parse_id(val)?,
                Some("result") => response.result = Some(val),
                Some("error") => match val {
                    Value::String(s) => response.error = s.into_str(),
                    Value::Nil => {}
                    _ => return Err(invalid("error must be a string")),
                },
                _ => {}
            }
        }
        Ok(response)
    }
}

fn into_map(value: Value) -> Result<Vec<(Value, Value)>, CodecError> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(invalid("expected a map")),
    }
}

/// Wire ids are strings; integer ids from peers are kept as decimal text.
fn parse_id(value: Value) -> Result<Option<String>, CodecError> {
    match value {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(s.into_str()),
        Value::Integer(n) => Ok(Some(n.to_string())),
        _ => Err(invalid("id must be a string")),
    }
}

fn invalid(msg: &str) -> CodecError {
    CodecError::InvalidMessage(msg.to_owned())
}
