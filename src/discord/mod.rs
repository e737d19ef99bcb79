use const_format::formatcp;
use reqwest::Client;

mod backoff;
mod close_code;
mod connection;
mod dispatch;
mod error;
mod gateway;
mod heartbeat;
mod listener;
mod payload;
mod session;

pub use backoff::ReconnectConfig;
pub use close_code::{Recovery, LAST_RESUMABLE_CLOSE_CODE};
pub use dispatch::{route, DispatchRouter, EventHandler, LogEvents, Route};
pub use error::{DecodeError, GatewayError};
pub use gateway::{ConnectionState, GatewayClient, Status};
pub use payload::{
    decode, encode_heartbeat, encode_identify, encode_resume, Dispatch, DispatchData, Event,
    Hello, Identify, Opcode, Payload, Ready,
};

pub const API: &str = formatcp!("https://discord.com/api/v{API_VERSION}");
const API_VERSION: u8 = 10;
const USER_AGENT: &str = formatcp!(
    "DiscordBot ({}, {})",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION")
);

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    api: Box<str>,
}

impl DiscordClient {
    pub fn new() -> Result<Self, GatewayError> {
        Self::with_api_base(API)
    }

    /// Uses `api` (for example `https://discord.com/api/v10`) for the bootstrap lookup.
    pub fn with_api_base(api: &str) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(DiscordClient {
            http,
            api: api.trim_end_matches('/').into(),
        })
    }
}
