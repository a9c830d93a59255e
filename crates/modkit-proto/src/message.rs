//! JSON-RPC message types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use crate::ProtocolError;

/// Protocol version carried in every outbound message
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier
///
/// JSON-RPC allows numbers and strings. Ids generated by this crate are
/// always numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric id
    Num(i64),
    /// String id
    Str(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(id: i64) -> Self {
        Self::Num(id)
    }
}

/// Top-level message wrapper
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Request or notification
    Request(Request),
    /// Response to an earlier request
    Response(Response),
}

impl Message {
    /// Create a request message
    pub fn request(req: Request) -> Self {
        Self::Request(req)
    }

    /// Create a response message
    pub fn response(resp: Response) -> Self {
        Self::Response(resp)
    }

    /// Classify a decoded JSON document
    ///
    /// Objects with a `method` member are requests, objects with a `result`
    /// or `error` member are responses. Anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let (is_request, is_response) = match value.as_object() {
            Some(object) => (
                object.contains_key("method"),
                object.contains_key("result") || object.contains_key("error"),
            ),
            None => {
                return Err(ProtocolError::InvalidMessage("expected a JSON object".to_string()));
            }
        };

        if is_request {
            serde_json::from_value(value)
                .map(Self::Request)
                .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
        } else if is_response {
            serde_json::from_value(value)
                .map(Self::Response)
                .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
        } else {
            Err(ProtocolError::InvalidMessage(
                "object is neither a request nor a response".to_string()
            ))
        }
    }

    /// Reject messages that announce a foreign protocol version
    ///
    /// A missing `jsonrpc` member is accepted.
    pub fn check_version(&self) -> Result<(), ProtocolError> {
        let version = match self {
            Self::Request(req) => req.jsonrpc.as_deref(),
            Self::Response(resp) => resp.jsonrpc.as_deref(),
        };
        match version {
            Some(v) if v != JSONRPC_VERSION => Err(ProtocolError::VersionMismatch(v.to_string())),
            _ => Ok(()),
        }
    }
}

/// Request (or notification, when `id` is absent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request ID for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

impl Request {
    /// Create a method call
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Id) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Create a notification, which expects no response
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Check whether this request expects a response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Response to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Id of the request this responds to
    #[serde(default)]
    pub id: Option<Id>,
    /// Successful result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Id>, error: RpcError) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Convert into the result payload or the error object
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error object carried by error responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create a new error object
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError,
    /// The JSON sent is not a valid request object
    InvalidRequest,
    /// The method does not exist
    MethodNotFound,
    /// Invalid method parameters
    InvalidParams,
    /// Internal error
    InternalError,
    /// Implementation-defined server error
    Server(i64),
}

impl ErrorCode {
    /// Numeric value of this code
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Server(code) => code,
        }
    }

    /// Map a numeric value back to a code
    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            other => Self::Server(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req = Request::new("describe", None, Id::Num(1));
        let encoded = serde_json::to_string(&Message::request(req)).unwrap();
        assert_eq!(encoded, r#"{"jsonrpc":"2.0","method":"describe","id":1}"#);
    }

    #[test]
    fn test_notification_has_no_id() {
        let req = Request::notification("log", Some(json!({"line": "hi"})));
        assert!(req.is_notification());
        let encoded = serde_json::to_value(&req).unwrap();
        assert!(encoded.get("id").is_none());
    }

    #[test]
    fn test_classify_response_without_version() {
        let value = json!({"id": 7, "result": {"name": "Lister"}});
        let message = Message::from_value(value).unwrap();

        assert!(message.check_version().is_ok());
        match message {
            Message::Response(resp) => {
                assert_eq!(resp.id, Some(Id::Num(7)));
                assert_eq!(resp.into_result().unwrap(), json!({"name": "Lister"}));
            }
            _ => panic!("Expected response"),
        }
    }

    #[test]
    fn test_classify_error_response() {
        let value = json!({
            "jsonrpc": "2.0",
            "id": "abc",
            "error": {"code": -32601, "message": "Method not found"}
        });
        let message = Message::from_value(value).unwrap();

        match message {
            Message::Response(resp) => {
                assert_eq!(resp.id, Some(Id::Str("abc".to_string())));
                let error = resp.into_result().unwrap_err();
                assert_eq!(ErrorCode::from_code(error.code), ErrorCode::MethodNotFound);
            }
            _ => panic!("Expected response"),
        }
    }

    #[test]
    fn test_classify_request() {
        let value = json!({"jsonrpc": "2.0", "method": "describe", "id": 3});
        match Message::from_value(value).unwrap() {
            Message::Request(req) => {
                assert_eq!(req.method, "describe");
                assert_eq!(req.id, Some(Id::Num(3)));
            }
            _ => panic!("Expected request"),
        }
    }

    #[test]
    fn test_reject_non_messages() {
        assert!(Message::from_value(json!([1, 2])).is_err());
        assert!(Message::from_value(json!({"id": 1})).is_err());
        assert!(Message::from_value(json!({"method": 5})).is_err());
    }

    #[test]
    fn test_version_mismatch() {
        let message = Message::from_value(json!({"jsonrpc": "1.0", "id": 1, "result": 2})).unwrap();
        assert!(matches!(message.check_version(), Err(ProtocolError::VersionMismatch(v)) if v == "1.0"));
    }

    #[test]
    fn test_null_result_is_success() {
        let resp: Response = serde_json::from_value(json!({"id": 1, "result": null})).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_error_code_mapping() {
        for code in [-32700, -32600, -32601, -32602, -32603, -1] {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
    }
}
