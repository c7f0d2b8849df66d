//! JSON-RPC 2.0 wire types for the newline-delimited Snapcast control
//! protocol (spec §4.1/§6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialises to one newline-terminated line, as the wire framing
    /// requires.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// A decoded line from the server: either a response to one of our
/// requests (has `id`), or an unsolicited notification (has `method` but
/// no `id`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone)]
pub enum ServerMessage {
    Response {
        id: u64,
        result: std::result::Result<Value, JsonRpcError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

pub fn parse_line(line: &str) -> serde_json::Result<ServerMessage> {
    let raw: RawMessage = serde_json::from_str(line)?;
    if let Some(id) = raw.id {
        let result = match raw.error {
            Some(err) => Err(err),
            None => Ok(raw.result.unwrap_or(Value::Null)),
        };
        Ok(ServerMessage::Response { id, result })
    } else if let Some(method) = raw.method {
        Ok(ServerMessage::Notification {
            method,
            params: raw.params,
        })
    } else {
        // Treat as a malformed/unrecognised frame; caller logs and drops it.
        Ok(ServerMessage::Notification {
            method: "Unknown".to_string(),
            params: None,
        })
    }
}

/// Methods the transport notifies subscribers about (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapcastEventKind {
    ClientOnConnect,
    ClientOnDisconnect,
    ClientOnVolumeChanged,
    ClientOnLatencyChanged,
    ClientOnNameChanged,
    GroupOnMute,
    GroupOnStreamChanged,
    GroupOnNameChanged,
    StreamOnUpdate,
    ServerOnUpdate,
    Unknown,
}

impl SnapcastEventKind {
    pub fn from_method(method: &str) -> Self {
        match method {
            "Client.OnConnect" => SnapcastEventKind::ClientOnConnect,
            "Client.OnDisconnect" => SnapcastEventKind::ClientOnDisconnect,
            "Client.OnVolumeChanged" => SnapcastEventKind::ClientOnVolumeChanged,
            "Client.OnLatencyChanged" => SnapcastEventKind::ClientOnLatencyChanged,
            "Client.OnNameChanged" => SnapcastEventKind::ClientOnNameChanged,
            "Group.OnMute" => SnapcastEventKind::GroupOnMute,
            "Group.OnStreamChanged" => SnapcastEventKind::GroupOnStreamChanged,
            "Group.OnNameChanged" => SnapcastEventKind::GroupOnNameChanged,
            "Stream.OnUpdate" => SnapcastEventKind::StreamOnUpdate,
            "Server.OnUpdate" => SnapcastEventKind::ServerOnUpdate,
            _ => SnapcastEventKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapcastNotification {
    pub kind: SnapcastEventKind,
    pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialises_as_one_newline_terminated_line() {
        let req = JsonRpcRequest::new(1, "Server.GetStatus", None);
        let line = req.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("\"id\":1"));
    }

    #[test]
    fn parses_response_with_result() {
        let line = r#"{"id":3,"jsonrpc":"2.0","result":{"ok":true}}"#;
        match parse_line(line).unwrap() {
            ServerMessage::Response { id, result } => {
                assert_eq!(id, 3);
                assert!(result.is_ok());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parses_response_with_error() {
        let line = r#"{"id":4,"jsonrpc":"2.0","error":{"code":-1,"message":"nope"}}"#;
        match parse_line(line).unwrap() {
            ServerMessage::Response { id, result } => {
                assert_eq!(id, 4);
                assert!(result.is_err());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parses_notification_without_id() {
        let line = r#"{"jsonrpc":"2.0","method":"Client.OnVolumeChanged","params":{"id":"x"}}"#;
        match parse_line(line).unwrap() {
            ServerMessage::Notification { method, .. } => {
                assert_eq!(method, "Client.OnVolumeChanged");
                assert_eq!(
                    SnapcastEventKind::from_method(&method),
                    SnapcastEventKind::ClientOnVolumeChanged
                );
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }
}
