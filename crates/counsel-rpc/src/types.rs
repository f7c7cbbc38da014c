//! Wire envelopes.
//!
//! Request frame (client to server):
//! `{ "action": "join", "correlationId": "r1", ...bodyFields }`
//!
//! Response frame (server to client):
//! `{ "event": "response:join", "body": { "correlationId": "r1", "statusCode": 200, "body": ... } }`
//!
//! Push frame (server to client, unsolicited):
//! `{ "event": "incomingMessage", ...eventBody }`

use counsel_core::{CoreError, CorrelationId};
use serde_json::{Map, Value, json};

/// Prefix of every response event name.
pub const RESPONSE_PREFIX: &str = "response:";

/// Status code and optional body produced by one dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// HTTP-style status code.
    pub status_code: u16,
    /// Response body; absent for 204.
    pub body: Option<Value>,
}

impl Reply {
    /// 200 with a body.
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body: Some(body),
        }
    }

    /// 204 without a body.
    pub fn no_content() -> Self {
        Self {
            status_code: 204,
            body: None,
        }
    }

    /// Arbitrary status and body.
    pub fn with_status(status_code: u16, body: Option<Value>) -> Self {
        Self { status_code, body }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// A client request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestEnvelope {
    /// Client-generated id echoed in the response.
    pub correlation_id: CorrelationId,
    /// Action name.
    pub action: String,
    /// Request body (the frame's remaining fields).
    pub body: Value,
}

impl RequestEnvelope {
    /// New request with a fresh correlation id.
    pub fn new(action: impl Into<String>, body: Value) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            action: action.into(),
            body,
        }
    }

    /// Flatten into a wire frame. A non-object body travels under `"body"`.
    pub fn to_frame(&self) -> Value {
        let mut frame = match &self.body {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("body".into(), other.clone());
                map
            }
        };
        let _ = frame.insert("action".into(), json!(self.action));
        let _ = frame.insert("correlationId".into(), json!(self.correlation_id));
        Value::Object(frame)
    }

    /// Parse a wire frame, stripping `action` and `correlationId` from the body.
    pub fn from_frame(frame: Value) -> Result<Self, CoreError> {
        let Value::Object(mut map) = frame else {
            return Err(CoreError::Validation(vec![counsel_core::FieldError::new(
                "",
                "request frame must be an object",
                Value::Null,
            )]));
        };
        let action = take_string(&mut map, "action")?;
        let correlation_id = take_string(&mut map, "correlationId")?;
        Ok(Self {
            correlation_id: CorrelationId::from(correlation_id),
            action,
            body: Value::Object(map),
        })
    }

    /// Response to this request, echoing its correlation id.
    pub fn respond(&self, reply: Reply) -> ResponseEnvelope {
        ResponseEnvelope {
            correlation_id: self.correlation_id.clone(),
            action: self.action.clone(),
            status_code: reply.status_code,
            body: reply.body,
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<String, CoreError> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        other => Err(CoreError::Validation(vec![counsel_core::FieldError::new(
            format!("/{key}"),
            "must be a non-empty string",
            other.unwrap_or(Value::Null),
        )])),
    }
}

/// A response to one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    /// Echoed from the request.
    pub correlation_id: CorrelationId,
    /// Action that produced this response.
    pub action: String,
    /// HTTP-style status code.
    pub status_code: u16,
    /// Response body; absent for 204.
    pub body: Option<Value>,
}

impl ResponseEnvelope {
    /// `"response:" + action`.
    pub fn event_name(&self) -> String {
        format!("{RESPONSE_PREFIX}{}", self.action)
    }

    /// Serialize into a wire frame.
    pub fn to_frame(&self) -> Value {
        let mut body = Map::new();
        let _ = body.insert("correlationId".into(), json!(self.correlation_id));
        let _ = body.insert("statusCode".into(), json!(self.status_code));
        if let Some(b) = &self.body {
            let _ = body.insert("body".into(), b.clone());
        }
        json!({ "event": self.event_name(), "body": Value::Object(body) })
    }

    /// The status and body as a [`Reply`].
    pub fn reply(&self) -> Reply {
        Reply::with_status(self.status_code, self.body.clone())
    }
}

/// An unsolicited server push.
#[derive(Clone, Debug, PartialEq)]
pub struct PushFrame {
    /// Event name.
    pub event: String,
    /// Event body fields, flattened into the frame.
    pub body: Map<String, Value>,
}

impl PushFrame {
    /// Build a push frame. A non-object body travels under `"body"`.
    pub fn new(event: impl Into<String>, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("body".into(), other);
                map
            }
        };
        Self {
            event: event.into(),
            body,
        }
    }

    /// Serialize into a wire frame.
    pub fn to_frame(&self) -> Value {
        let mut frame = self.body.clone();
        let _ = frame.insert("event".into(), json!(self.event));
        Value::Object(frame)
    }

    /// A body field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

/// A frame received by a client.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// `response:<action>` frame.
    Response(ResponseEnvelope),
    /// Any other event.
    Push(PushFrame),
}

impl InboundFrame {
    /// Parse raw frame text. Returns `None` for anything that is not an
    /// object with a string `event`, or a malformed response body.
    pub fn parse(text: &str) -> Option<Self> {
        let Value::Object(mut map) = serde_json::from_str::<Value>(text).ok()? else {
            return None;
        };
        let Some(Value::String(event)) = map.remove("event") else {
            return None;
        };

        if let Some(action) = event.strip_prefix(RESPONSE_PREFIX) {
            let body = map.get("body")?.as_object()?;
            let correlation_id = body.get("correlationId")?.as_str()?;
            let status_code = u16::try_from(body.get("statusCode")?.as_u64()?).ok()?;
            return Some(Self::Response(ResponseEnvelope {
                correlation_id: CorrelationId::from(correlation_id),
                action: action.to_owned(),
                status_code,
                body: body.get("body").cloned(),
            }));
        }

        Some(Self::Push(PushFrame { event, body: map }))
    }
}
