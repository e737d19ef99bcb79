//! Bot identity: the credential and the gateway intents it declares.
//!
//! Intents are configured by name in a TOML file:
//!
//! ```toml
//! intents = ["GUILDS", "GUILD_MESSAGES", "MESSAGE_CONTENT"]
//! ```
//!
//! or as a table, where intents set to `false` are left out:
//!
//! ```toml
//! [intents]
//! GUILDS = true
//! GUILD_PRESENCES = false
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use bitflags::bitflags;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ConfigError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GatewayIntents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EXPRESSIONS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;
        const GUILD_MESSAGE_POLLS = 1 << 24;
        const DIRECT_MESSAGE_POLLS = 1 << 25;
    }
}

/// Bot token. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(Box<str>);

impl Token {
    pub fn new(token: impl Into<Box<str>>) -> Self {
        Token(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<{} chars redacted>)", self.0.chars().count())
    }
}

#[derive(Debug, Clone)]
pub struct Identity {
    token: Token,
    intents: GatewayIntents,
}

#[derive(Deserialize)]
struct IntentsFile {
    #[serde(default)]
    intents: IntentNames,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntentNames {
    List(Vec<String>),
    Toggles(BTreeMap<String, bool>),
}

impl Default for IntentNames {
    fn default() -> Self {
        IntentNames::List(Vec::new())
    }
}

impl IntentNames {
    fn enabled(self) -> Vec<String> {
        match self {
            IntentNames::List(names) => names,
            IntentNames::Toggles(toggles) => toggles
                .into_iter()
                .filter_map(|(name, enabled)| enabled.then_some(name))
                .collect(),
        }
    }
}

impl Identity {
    pub fn new(token: Token, intents: GatewayIntents) -> Self {
        Identity { token, intents }
    }

    /// Reads the intents file at `path`. Unknown intent names are logged and skipped.
    pub fn load(token: Token, path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: IntentsFile = toml::from_str(&raw)?;
        let (intents, _) = resolve_intents(&file.intents.enabled());
        info!(intents = intents.bits(), path = %path.display(), "gateway intents loaded");
        Ok(Identity::new(token, intents))
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn intents(&self) -> GatewayIntents {
        self.intents
    }
}

/// Combines intent names, case-insensitively. Returns the mask and the names
/// that matched no intent.
pub fn resolve_intents<S: AsRef<str>>(names: &[S]) -> (GatewayIntents, Vec<String>) {
    let mut intents = GatewayIntents::empty();
    let mut unknown = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        match GatewayIntents::from_name(&name.to_ascii_uppercase()) {
            Some(intent) => intents |= intent,
            None => {
                warn!(intent = %name, "ignoring unrecognised gateway intent");
                unknown.push(name.to_string());
            }
        }
    }
    (intents, unknown)
}
