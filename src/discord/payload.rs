use std::env::consts::OS;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::discord::error::DecodeError;
use crate::identity::Identity;

/// A gateway frame exactly as it appears on the wire.
#[derive(Debug, Deserialize, Serialize)]
pub struct Payload {
    pub op: Opcode,
    #[serde(default)]
    pub d: Value,
    #[serde(skip_serializing)]
    pub s: Option<u64>,
    #[serde(skip_serializing)]
    pub t: Option<Box<str>>,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
pub enum Opcode {
    Dispatch,
    Heartbeat,
    Identify,
    PresenceUpdate,
    VoiceStateUpdate,
    Resume = 6,
    Reconnect,
    RequestGuildMembers,
    InvalidSession,
    Hello,
    HeartbeatACK,
    RequestSoundboardSounds = 31,
}

impl Opcode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "Dispatch",
            Self::Heartbeat => "Heartbeat",
            Self::Identify => "Identify",
            Self::PresenceUpdate => "PresenceUpdate",
            Self::VoiceStateUpdate => "VoiceStateUpdate",
            Self::Resume => "Resume",
            Self::Reconnect => "Reconnect",
            Self::RequestGuildMembers => "RequestGuildMembers",
            Self::InvalidSession => "InvalidSession",
            Self::Hello => "Hello",
            Self::HeartbeatACK => "HeartbeatACK",
            Self::RequestSoundboardSounds => "RequestSoundboardSounds",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as u8)
    }
}

/// A decoded inbound frame, with its body parsed according to the opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Dispatch(Dispatch),
    Heartbeat,
    HeartbeatAck,
    Reconnect,
    InvalidSession { resumable: bool },
    Hello(Hello),
    /// A client-only opcode echoed by the server.
    Unexpected(Opcode),
}

impl Event {
    pub fn describe(&self) -> String {
        match self {
            Self::Dispatch(dispatch) => format!("{} {}", Opcode::Dispatch, dispatch.name),
            Self::Heartbeat => Opcode::Heartbeat.to_string(),
            Self::HeartbeatAck => Opcode::HeartbeatACK.to_string(),
            Self::Reconnect => Opcode::Reconnect.to_string(),
            Self::InvalidSession { .. } => Opcode::InvalidSession.to_string(),
            Self::Hello(_) => Opcode::Hello.to_string(),
            Self::Unexpected(op) => op.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub name: Box<str>,
    pub sequence: Option<u64>,
    pub data: DispatchData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchData {
    Ready(Ready),
    Resumed,
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ready {
    pub session_id: Box<str>,
    pub resume_gateway_url: Box<str>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Identify {
    pub token: Box<str>,
    pub properties: ConnectionProperties,
    pub intents: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConnectionProperties {
    pub os: Box<str>,
    pub browser: Box<str>,
    pub device: Box<str>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Resume {
    pub token: Box<str>,
    pub session_id: Box<str>,
    pub seq: Option<u64>,
}

#[derive(Serialize)]
struct Command<'a, T> {
    op: Opcode,
    d: &'a T,
}

const PKG_NAME: &str = env!("CARGO_PKG_NAME");

pub fn decode(frame: &str) -> Result<Event, DecodeError> {
    let payload: Payload = serde_json::from_str(frame)?;
    payload.into_event()
}

impl Payload {
    pub fn into_event(self) -> Result<Event, DecodeError> {
        let Payload { op, d, s, t } = self;
        match (op, t) {
            (Opcode::Dispatch, Some(name)) => {
                let data = match &*name {
                    "READY" => DispatchData::Ready(body("READY", d)?),
                    "RESUMED" => DispatchData::Resumed,
                    _ => DispatchData::Other(d),
                };
                Ok(Event::Dispatch(Dispatch {
                    name,
                    sequence: s,
                    data,
                }))
            }
            (Opcode::Dispatch, None) => Err(DecodeError::MissingEventName),
            (op, Some(_)) => Err(DecodeError::UnexpectedEventName(op)),
            (Opcode::Hello, None) => Ok(Event::Hello(body("Hello", d)?)),
            (Opcode::Heartbeat, None) => Ok(Event::Heartbeat),
            (Opcode::HeartbeatACK, None) => Ok(Event::HeartbeatAck),
            (Opcode::Reconnect, None) => Ok(Event::Reconnect),
            (Opcode::InvalidSession, None) => Ok(Event::InvalidSession {
                resumable: d.as_bool().unwrap_or(false),
            }),
            (op, None) => Ok(Event::Unexpected(op)),
        }
    }
}

fn body<T: DeserializeOwned>(kind: &'static str, d: Value) -> Result<T, DecodeError> {
    serde_json::from_value(d).map_err(|source| DecodeError::Body { kind, source })
}

fn encode<T: Serialize>(op: Opcode, d: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Command { op, d })
}

pub fn encode_heartbeat(sequence: Option<u64>) -> Result<String, serde_json::Error> {
    encode(Opcode::Heartbeat, &sequence)
}

pub fn encode_identify(identity: &Identity) -> Result<String, serde_json::Error> {
    encode(
        Opcode::Identify,
        &Identify {
            token: identity.token().expose().into(),
            properties: ConnectionProperties {
                os: OS.into(),
                browser: PKG_NAME.into(),
                device: PKG_NAME.into(),
            },
            intents: identity.intents().bits(),
        },
    )
}

pub fn encode_resume(
    token: &str,
    session_id: &str,
    sequence: Option<u64>,
) -> Result<String, serde_json::Error> {
    encode(
        Opcode::Resume,
        &Resume {
            token: token.into(),
            session_id: session_id.into(),
            seq: sequence,
        },
    )
}
