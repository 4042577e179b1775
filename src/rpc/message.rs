//! RPC message framing.
//!
//! Messages follow the msgpack-rpc spec
//! (<https://github.com/msgpack-rpc/msgpack-rpc/blob/master/spec.md>):
//! a MessagePack array with a leading integer type tag.
//!
//! ```text
//! Request:      [0, msgid, method, params]
//! Response:     [1, msgid, error, result]
//! Notification: [2, method, params]
//! ```
//!
//! `msgid` is a 32-bit unsigned correlation id; exactly one of a response's
//! `error`/`result` is non-nil.

use bytes::Bytes;

use crate::codec::encode;
use crate::error::{Error, Result};
use crate::value::Value;

/// Type tag of a request tuple.
pub const REQUEST_TYPE: u64 = 0;
/// Type tag of a response tuple.
pub const RESPONSE_TYPE: u64 = 1;
/// Type tag of a notification tuple.
pub const NOTIFICATION_TYPE: u64 = 2;

/// One framed RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        msgid: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        msgid: u32,
        error: Value,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl RpcMessage {
    /// Build a request tuple.
    pub fn request(msgid: u32, method: impl Into<String>, params: Vec<Value>) -> Self {
        RpcMessage::Request {
            msgid,
            method: method.into(),
            params,
        }
    }

    /// Build a response tuple. Exactly one of `result`/`error` should be
    /// non-nil; the wire order is error before result.
    pub fn response(msgid: u32, result: Value, error: Value) -> Self {
        RpcMessage::Response {
            msgid,
            error,
            result,
        }
    }

    /// Build a notification tuple.
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        RpcMessage::Notification {
            method: method.into(),
            params,
        }
    }

    /// The message's method name, when it has one.
    pub fn method(&self) -> Option<&str> {
        match self {
            RpcMessage::Request { method, .. } | RpcMessage::Notification { method, .. } => {
                Some(method)
            }
            RpcMessage::Response { .. } => None,
        }
    }

    /// The message's correlation id, when it has one.
    pub fn msgid(&self) -> Option<u32> {
        match self {
            RpcMessage::Request { msgid, .. } | RpcMessage::Response { msgid, .. } => Some(*msgid),
            RpcMessage::Notification { .. } => None,
        }
    }

    /// Lower the message to its on-wire value tuple.
    pub fn to_value(&self) -> Value {
        match self {
            RpcMessage::Request {
                msgid,
                method,
                params,
            } => Value::Array(vec![
                Value::UInt(REQUEST_TYPE),
                Value::UInt(u64::from(*msgid)),
                Value::Str(method.clone()),
                Value::Array(params.clone()),
            ]),
            RpcMessage::Response {
                msgid,
                error,
                result,
            } => Value::Array(vec![
                Value::UInt(RESPONSE_TYPE),
                Value::UInt(u64::from(*msgid)),
                error.clone(),
                result.clone(),
            ]),
            RpcMessage::Notification { method, params } => Value::Array(vec![
                Value::UInt(NOTIFICATION_TYPE),
                Value::Str(method.clone()),
                Value::Array(params.clone()),
            ]),
        }
    }

    /// Validate and lift an on-wire value tuple.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(mut items) = value else {
            return Err(Error::Type("message is not an array"));
        };
        let Some(type_tag) = items.first().and_then(Value::as_u64) else {
            return Err(Error::Type("message type tag is not an integer"));
        };

        match type_tag {
            REQUEST_TYPE => {
                if items.len() != 4 {
                    return Err(Error::Type("request must have 4 elements"));
                }
                let params = take_params(items.pop().expect("length checked"))?;
                let method = take_method(items.pop().expect("length checked"))?;
                let msgid = take_msgid(&items[1])?;
                Ok(RpcMessage::Request {
                    msgid,
                    method,
                    params,
                })
            }
            RESPONSE_TYPE => {
                if items.len() != 4 {
                    return Err(Error::Type("response must have 4 elements"));
                }
                let result = items.pop().expect("length checked");
                let error = items.pop().expect("length checked");
                let msgid = take_msgid(&items[1])?;
                Ok(RpcMessage::Response {
                    msgid,
                    error,
                    result,
                })
            }
            NOTIFICATION_TYPE => {
                if items.len() != 3 {
                    return Err(Error::Type("notification must have 3 elements"));
                }
                let params = take_params(items.pop().expect("length checked"))?;
                let method = take_method(items.pop().expect("length checked"))?;
                Ok(RpcMessage::Notification { method, params })
            }
            _ => Err(Error::Type("unknown message type tag")),
        }
    }

    /// Encode the message to MessagePack bytes.
    pub fn encode(&self) -> Result<Bytes> {
        encode(&self.to_value())
    }
}

fn take_msgid(value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or(Error::Type("msgid is not a 32-bit unsigned integer"))
}

fn take_method(value: Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s),
        _ => Err(Error::Type("method is not a string")),
    }
}

fn take_params(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(Error::Type("params is not an array")),
    }
}

/// Build and encode a request in one step.
pub fn make_request(msgid: u32, method: &str, params: Vec<Value>) -> Result<Bytes> {
    RpcMessage::request(msgid, method, params).encode()
}

/// Build and encode a response in one step.
pub fn make_response(msgid: u32, result: Value, error: Value) -> Result<Bytes> {
    RpcMessage::response(msgid, result, error).encode()
}

/// Build and encode a notification in one step.
pub fn make_notification(method: &str, params: Vec<Value>) -> Result<Bytes> {
    RpcMessage::notification(method, params).encode()
}
