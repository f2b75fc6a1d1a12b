//! Engine.IO v4 / Socket.IO v5 text framing
//!
//! Every websocket text frame is one Engine.IO packet: a single digit type
//! followed by its data. Socket.IO packets ride inside Engine.IO `message`
//! packets as `<type>[/namespace,][ackId][json]`. Only the text subset is
//! handled; binary attachments are rejected.

use crate::errors::PacketError;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Engine.IO `open` payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

impl Handshake {
    /// How long to wait for a server ping before treating the link as dead
    pub fn ping_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let data = chars.as_str();

        match kind {
            '0' => serde_json::from_str(data)
                .map(EnginePacket::Open)
                .map_err(|e| PacketError::Malformed(format!("open payload: {}", e))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data.to_string())),
            '3' => Ok(EnginePacket::Pong(data.to_string())),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(PacketError::UnknownType {
                layer: "engine",
                kind: other,
            }),
        }
    }

    /// Client side only ever sends pongs, messages and close
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        payload: Value,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Value,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl SocketPacket {
    pub fn connect(namespace: &str) -> Self {
        SocketPacket::Connect {
            namespace: namespace.to_string(),
            data: None,
        }
    }

    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: namespace.to_string(),
            id: None,
            name: name.to_string(),
            payload,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Encode as the data of an Engine.IO message packet
    pub fn encode(&self) -> String {
        let (kind, id, body) = match self {
            SocketPacket::Connect { data, .. } => {
                ('0', None, data.as_ref().map(|d| d.to_string()))
            }
            SocketPacket::Disconnect { .. } => ('1', None, None),
            SocketPacket::Event {
                id, name, payload, ..
            } => {
                let args = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                ('2', *id, Some(args.to_string()))
            }
            SocketPacket::Ack { id, data, .. } => {
                ('3', Some(*id), Some(Value::Array(vec![data.clone()]).to_string()))
            }
            SocketPacket::ConnectError { data, .. } => ('4', None, Some(data.to_string())),
        };

        let mut out = String::new();
        out.push(kind);
        let namespace = self.namespace();
        if namespace != "/" {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(body) = body {
            out.push_str(&body);
        }
        out
    }

    pub fn decode(data: &str) -> Result<Self, PacketError> {
        let mut chars = data.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        if kind == '5' || kind == '6' {
            return Err(PacketError::Unsupported("binary attachments"));
        }

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let namespace = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
            namespace
        } else {
            "/".to_string()
        };

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| PacketError::Malformed(format!("ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let body = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| PacketError::Malformed(format!("json body: {}", e)))?,
            )
        };

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: body,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match body {
                    Some(Value::Array(args)) => args.into_iter(),
                    _ => return Err(PacketError::Malformed("event without argument array".into())),
                };
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(PacketError::Malformed("event without a name".into())),
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::Malformed("ack without id".into()))?;
                let data = match body {
                    Some(Value::Array(mut args)) if !args.is_empty() => args.remove(0),
                    _ => Value::Null,
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    data,
                })
            }
            '4' => Ok(SocketPacket::ConnectError {
                namespace,
                data: body.unwrap_or(Value::Null),
            }),
            other => Err(PacketError::UnknownType {
                layer: "socket",
                kind: other,
            }),
        }
    }
}

/// Human-readable reason from a connect error body (`{"message": ..}` or a bare string)
pub fn connect_error_reason(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        other => other.to_string(),
    }
}
