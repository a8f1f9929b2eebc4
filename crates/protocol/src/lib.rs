//! Wire types for the session layer's JSON-RPC-over-WebSocket framing.
//!
//! A text frame is always a JSON array. Its shape is distinguished by the
//! type of the first element:
//!
//! - `[name: string, cid: null | int, args...]` — a command, fire-and-forget
//!   when `cid` is null, a request awaiting exactly one reply otherwise.
//! - `[true, cid: int, results...]` — a successful reply.
//! - `[false, cid: int, message: string]` — an error reply.
//!
//! Binary frames carry opaque file payloads and are consumed out-of-band,
//! FIFO, bound to a prior `accept_files` call (see `fleet-session`).

pub mod facts;

use fleet_domain::Value;
use serde_json::Value as Json;

pub type CallId = u64;

/// Route name for an agent to publish its host facts.
pub const ROUTE_PRETENSES: &str = "pretenses";
/// Route name for the controller to push a policy application.
pub const ROUTE_APPLY: &str = "apply";
pub const ROUTE_DRY_RUN: &str = "dry_run";
pub const ROUTE_ACCEPT_FILES: &str = "accept_files";
pub const ROUTE_DISCARD_FILES: &str = "discard_files";
/// Admin-only routes.
pub const ROUTE_ONLINE: &str = "online";
pub const ROUTE_REPORT: &str = "report";
pub const ROUTE_QUIT: &str = "quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `[name, cid, args...]`. `cid == None` means fire-and-forget.
    Command {
        name: String,
        cid: Option<CallId>,
        args: Vec<Value>,
    },
    /// `[true, cid, results...]`.
    Success { cid: CallId, result: Vec<Value> },
    /// `[false, cid, message]`.
    Error { cid: CallId, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not a JSON array")]
    NotArray,
    #[error("frame array is empty")]
    Empty,
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl Frame {
    pub fn parse(text: &str) -> Result<Frame, FrameError> {
        let json: Json = serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Self::from_json(json)
    }

    pub fn from_json(json: Json) -> Result<Frame, FrameError> {
        let arr = match json {
            Json::Array(a) => a,
            _ => return Err(FrameError::NotArray),
        };
        if arr.is_empty() {
            return Err(FrameError::Empty);
        }
        let mut iter = arr.into_iter();
        let head = iter.next().unwrap();
        match head {
            Json::String(name) => {
                let cid_raw = iter
                    .next()
                    .ok_or_else(|| FrameError::Malformed("missing cid slot".into()))?;
                let cid = match cid_raw {
                    Json::Null => None,
                    Json::Number(n) => Some(
                        n.as_u64()
                            .ok_or_else(|| FrameError::Malformed("cid not a non-negative integer".into()))?,
                    ),
                    _ => return Err(FrameError::Malformed("cid must be null or an integer".into())),
                };
                let args = iter.map(Value::from_json).collect();
                Ok(Frame::Command { name, cid, args })
            }
            Json::Bool(true) => {
                let cid = expect_cid(iter.next())?;
                let result = iter.map(Value::from_json).collect();
                Ok(Frame::Success { cid, result })
            }
            Json::Bool(false) => {
                let cid = expect_cid(iter.next())?;
                let message = match iter.next() {
                    Some(Json::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(Frame::Error { cid, message })
            }
            _ => Err(FrameError::Malformed("leading element must be a string or a bool".into())),
        }
    }

    pub fn encode(&self) -> String {
        let json = match self {
            Frame::Command { name, cid, args } => {
                let mut arr = vec![Json::String(name.clone()), cid_to_json(*cid)];
                arr.extend(args.iter().map(value_to_json));
                Json::Array(arr)
            }
            Frame::Success { cid, result } => {
                let mut arr = vec![Json::Bool(true), Json::Number((*cid).into())];
                arr.extend(result.iter().map(value_to_json));
                Json::Array(arr)
            }
            Frame::Error { cid, message } => Json::Array(vec![
                Json::Bool(false),
                Json::Number((*cid).into()),
                Json::String(message.clone()),
            ]),
        };
        json.to_string()
    }
}

fn expect_cid(slot: Option<Json>) -> Result<CallId, FrameError> {
    match slot {
        Some(Json::Number(n)) => n
            .as_u64()
            .ok_or_else(|| FrameError::Malformed("cid not a non-negative integer".into())),
        _ => Err(FrameError::Malformed("reply frame missing numeric cid".into())),
    }
}

fn cid_to_json(cid: Option<CallId>) -> Json {
    match cid {
        Some(c) => Json::Number(c.into()),
        None => Json::Null,
    }
}

fn value_to_json(v: &Value) -> Json {
    serde_json::to_value(v).unwrap_or(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fire_and_forget_command() {
        let f = Frame::parse(r#"["pretenses", null, {"hostname": "h1"}]"#).unwrap();
        match f {
            Frame::Command { name, cid, args } => {
                assert_eq!(name, "pretenses");
                assert_eq!(cid, None);
                assert_eq!(args.len(), 1);
            }
            _ => panic!("expected Command"),
        }
    }

    #[test]
    fn parses_request_with_cid() {
        let f = Frame::parse(r#"["apply", 3, "h1"]"#).unwrap();
        assert!(matches!(f, Frame::Command { cid: Some(3), .. }));
    }

    #[test]
    fn parses_success_reply() {
        let f = Frame::parse(r#"[true, 3, "ok"]"#).unwrap();
        match f {
            Frame::Success { cid, result } => {
                assert_eq!(cid, 3);
                assert_eq!(result.len(), 1);
            }
            _ => panic!("expected Success"),
        }
    }

    #[test]
    fn parses_error_reply() {
        let f = Frame::parse(r#"[false, 3, "boom"]"#).unwrap();
        assert!(matches!(f, Frame::Error { cid: 3, .. }));
    }

    #[test]
    fn rejects_non_array() {
        assert!(matches!(Frame::parse(r#"{"a":1}"#), Err(FrameError::NotArray)));
    }

    #[test]
    fn rejects_empty_array() {
        assert!(matches!(Frame::parse("[]"), Err(FrameError::Empty)));
    }

    #[test]
    fn round_trips_command() {
        let f = Frame::Command {
            name: "accept_files".into(),
            cid: None,
            args: vec![Value::Str("conf/app.cfg".into())],
        };
        let encoded = f.encode();
        let parsed = Frame::parse(&encoded).unwrap();
        assert_eq!(parsed, f);
    }
}
