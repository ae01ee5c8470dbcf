//! JSON-RPC 2.0 message codec.
//!
//! One [`Message`] is one frame. Encoding always succeeds for well-formed
//! values; decoding classifies an incoming frame as a request, response,
//! error or notification, or fails with a [`DecodeError`] that the caller
//! logs and drops.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier. Quill allocates numbers; peers may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id)
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Error(ErrorResponse),
    Notification(Notification),
}

/// A call that expects exactly one response with the same id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A successful answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
}

/// A failed answer to a request. `id` is null when the request itself was unreadable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

/// A one-way message; never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// The `error` member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(self.code)
    }
}

/// Error kinds carried on the wire, each with a stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ToolNotFound,
    InvalidArguments,
    ToolExecutionError,
    SamplingUnavailable,
    UpstreamError,
    Other(i64),
}

impl ErrorKind {
    pub fn code(self) -> i64 {
        match self {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::InternalError => -32603,
            ErrorKind::ToolNotFound => -32001,
            ErrorKind::InvalidArguments => -32002,
            ErrorKind::ToolExecutionError => -32003,
            ErrorKind::SamplingUnavailable => -32004,
            ErrorKind::UpstreamError => -32005,
            ErrorKind::Other(code) => code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => ErrorKind::ParseError,
            -32600 => ErrorKind::InvalidRequest,
            -32601 => ErrorKind::MethodNotFound,
            -32602 => ErrorKind::InvalidParams,
            -32603 => ErrorKind::InternalError,
            -32001 => ErrorKind::ToolNotFound,
            -32002 => ErrorKind::InvalidArguments,
            -32003 => ErrorKind::ToolExecutionError,
            -32004 => ErrorKind::SamplingUnavailable,
            -32005 => ErrorKind::UpstreamError,
            other => ErrorKind::Other(other),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ParseError => f.write_str("parse error"),
            ErrorKind::InvalidRequest => f.write_str("invalid request"),
            ErrorKind::MethodNotFound => f.write_str("method not found"),
            ErrorKind::InvalidParams => f.write_str("invalid params"),
            ErrorKind::InternalError => f.write_str("internal error"),
            ErrorKind::ToolNotFound => f.write_str("tool not found"),
            ErrorKind::InvalidArguments => f.write_str("invalid arguments"),
            ErrorKind::ToolExecutionError => f.write_str("tool execution error"),
            ErrorKind::SamplingUnavailable => f.write_str("sampling unavailable"),
            ErrorKind::UpstreamError => f.write_str("upstream error"),
            ErrorKind::Other(code) => write!(f, "error {code}"),
        }
    }
}

/// A frame that could not be turned into a [`Message`]. Never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("invalid JSON-RPC message: {0}")]
    Invalid(String),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

fn envelope<T: Serialize>(body: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        jsonrpc: JSONRPC_VERSION,
        body,
    })
}

/// Encode a message as one frame (without the trailing newline).
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    match message {
        Message::Request(r) => envelope(r),
        Message::Response(r) => envelope(r),
        Message::Error(e) => envelope(e),
        Message::Notification(n) => envelope(n),
    }
}

/// Decode one frame.
pub fn decode(frame: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(frame).map_err(|e| DecodeError::Json(e.to_string()))?;

    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => return Err(DecodeError::Invalid("batches are not supported".into())),
        other => {
            return Err(DecodeError::Invalid(format!(
                "expected an object, got {}",
                json_type(&other)
            )));
        }
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(DecodeError::Invalid(format!(
                "unsupported jsonrpc version {other}"
            )));
        }
        None => return Err(DecodeError::Invalid("missing jsonrpc version".into())),
    }

    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw)
                .map_err(|_| DecodeError::Invalid("id must be a number or string".into()))?,
        ),
    };

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(DecodeError::Invalid("method must be a string".into()));
        };
        let params = obj.remove("params");
        return Ok(match id {
            Some(id) => Message::Request(Request { id, method, params }),
            None => Message::Notification(Notification { method, params }),
        });
    }

    if let Some(error) = obj.remove("error") {
        let error: ErrorObject = serde_json::from_value(error)
            .map_err(|e| DecodeError::Invalid(format!("malformed error object: {e}")))?;
        return Ok(Message::Error(ErrorResponse { id, error }));
    }

    if let Some(result) = obj.remove("result") {
        let id = id.ok_or_else(|| DecodeError::Invalid("response without id".into()))?;
        return Ok(Message::Response(Response { id, result }));
    }

    Err(DecodeError::Invalid(
        "message has neither method, result nor error".into(),
    ))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Request::new(1, "tools/call", Some(json!({"name": "read_record"})));
        let frame = encode(&Message::Request(req)).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["method"], "tools/call");
        assert_eq!(parsed["params"]["name"], "read_record");
    }

    #[test]
    fn request_without_params_omits_field() {
        let frame = encode(&Message::Request(Request::new(2, "tools/list", None))).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert!(parsed.get("params").is_none());
    }

    #[test]
    fn error_with_unknown_id_serializes_null() {
        let frame = encode(&Message::Error(ErrorResponse {
            id: None,
            error: ErrorObject::new(ErrorKind::ParseError, "bad"),
        }))
        .unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert!(parsed["id"].is_null());
        assert_eq!(parsed["error"]["code"], -32700);
    }

    #[test]
    fn every_variant_survives_a_round_trip() {
        let messages = vec![
            Message::Request(Request::new(7, "ping", None)),
            Message::Request(Request {
                id: RequestId::String("abc".into()),
                method: "tools/call".into(),
                params: Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
            }),
            Message::Response(Response {
                id: 7.into(),
                result: json!({}),
            }),
            Message::Response(Response {
                id: 8.into(),
                result: Value::Null,
            }),
            Message::Error(ErrorResponse {
                id: Some(9.into()),
                error: ErrorObject {
                    code: -32001,
                    message: "Unknown tool: nope".into(),
                    data: Some(json!({"name": "nope"})),
                },
            }),
            Message::Error(ErrorResponse {
                id: None,
                error: ErrorObject::new(ErrorKind::InvalidRequest, "bad"),
            }),
            Message::Notification(Notification::new("notifications/initialized", None)),
            Message::Notification(Notification::new(
                "notifications/message",
                Some(json!({"level": "info"})),
            )),
        ];

        for message in messages {
            let frame = encode(&message).unwrap();
            assert_eq!(decode(&frame).unwrap(), message, "frame: {frame}");
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        for frame in ["", "not json", "{", "\u{0}\u{1}", "[1,2]", "42", "\"str\""] {
            assert!(decode(frame).is_err(), "frame {frame:?} should not decode");
        }
    }

    #[test]
    fn shape_errors_are_reported() {
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":1}"#),
            Err(DecodeError::Invalid(_))
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#),
            Err(DecodeError::Invalid(_))
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","result":{}}"#),
            Err(DecodeError::Invalid(_))
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":true,"method":"x"}"#),
            Err(DecodeError::Invalid(_))
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":1,"method":5}"#),
            Err(DecodeError::Invalid(_))
        ));
        assert!(matches!(decode("nope"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn missing_id_with_method_is_notification() {
        let msg = decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, Message::Notification(n) if n.method == "notifications/initialized"));
    }

    #[test]
    fn error_kinds_map_to_codes() {
        for kind in [
            ErrorKind::ParseError,
            ErrorKind::MethodNotFound,
            ErrorKind::ToolNotFound,
            ErrorKind::InvalidArguments,
            ErrorKind::ToolExecutionError,
            ErrorKind::SamplingUnavailable,
            ErrorKind::UpstreamError,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
        assert_eq!(ErrorKind::from_code(-1), ErrorKind::Other(-1));
    }
}
