//! Server configuration
//!
//! Defaults match the messenger's historical constants; every field can be
//! overridden through a `PAWS_MESSENGER_*` environment variable.

use std::str::FromStr;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::client::SlowConsumerPolicy;
use crate::error::ConfigError;

/// Default bind address (the port the web client dials)
pub const DEFAULT_ADDR: &str = "127.0.0.1:42096";

const ENV_PREFIX: &str = "PAWS_MESSENGER_";

/// Runtime settings shared by the manager, rooms and connections
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listener address (host:port)
    pub addr: String,
    /// Capacity of each room's command queue
    pub room_command_capacity: usize,
    /// Capacity of each client's outbound queue
    pub outbound_capacity: usize,
    /// Messages replayed to a client when it joins
    pub history_limit: usize,
    /// Largest accepted inbound frame, in bytes
    pub max_message_size: usize,
    /// Connection is dropped when nothing arrives for this long
    pub idle_timeout: Duration,
    /// How often the server pings each connection
    pub ping_interval: Duration,
    /// A single frame write may take at most this long
    pub write_timeout: Duration,
    /// Empty rooms retire after this long; `None` keeps them forever
    pub room_idle_timeout: Option<Duration>,
    /// What a broadcast does when a member's queue is full
    pub slow_consumer: SlowConsumerPolicy,
    /// Pet identifier and owner pairs seeded into the in-memory store
    pub pets: Vec<(Uuid, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            room_command_capacity: 256,
            outbound_capacity: 1024,
            history_limit: 50,
            max_message_size: 1024,
            idle_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(9),
            write_timeout: Duration::from_secs(10),
            room_idle_timeout: Some(Duration::from_secs(300)),
            slow_consumer: SlowConsumerPolicy::Block,
            pets: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults with process environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides read through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let var = |name: &str| {
            lookup(format!("{ENV_PREFIX}{name}").as_str())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("ADDR") {
            info!("server config: addr overridden by env");
            cfg.addr = v;
        }
        if let Some(v) = var("ROOM_CAPACITY") {
            cfg.room_command_capacity = parse_positive("ROOM_CAPACITY", &v)?;
        }
        if let Some(v) = var("OUTBOUND_CAPACITY") {
            cfg.outbound_capacity = parse_positive("OUTBOUND_CAPACITY", &v)?;
        }
        if let Some(v) = var("HISTORY_LIMIT") {
            cfg.history_limit = parse("HISTORY_LIMIT", &v)?;
        }
        if let Some(v) = var("MAX_MESSAGE_SIZE") {
            cfg.max_message_size = parse_positive("MAX_MESSAGE_SIZE", &v)?;
        }
        if let Some(v) = var("IDLE_TIMEOUT_SECS") {
            cfg.idle_timeout = Duration::from_secs(parse_positive("IDLE_TIMEOUT_SECS", &v)? as u64);
        }
        if let Some(v) = var("PING_INTERVAL_SECS") {
            cfg.ping_interval =
                Duration::from_secs(parse_positive("PING_INTERVAL_SECS", &v)? as u64);
        }
        if let Some(v) = var("WRITE_TIMEOUT_SECS") {
            cfg.write_timeout =
                Duration::from_secs(parse_positive("WRITE_TIMEOUT_SECS", &v)? as u64);
        }
        if let Some(v) = var("ROOM_IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse("ROOM_IDLE_TIMEOUT_SECS", &v)?;
            cfg.room_idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = var("SLOW_CONSUMER") {
            cfg.slow_consumer = match v.as_str() {
                "block" => SlowConsumerPolicy::Block,
                "drop" => SlowConsumerPolicy::DropNewest,
                _ => return Err(invalid("SLOW_CONSUMER", &v)),
            };
        }
        if let Some(v) = var("PETS") {
            cfg.pets = parse_pets(&v)?;
        }

        Ok(cfg)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_positive(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match parse::<usize>(key, value)? {
        0 => Err(invalid(key, value)),
        n => Ok(n),
    }
}

/// `uuid=owner,uuid=owner`
fn parse_pets(value: &str) -> Result<Vec<(Uuid, String)>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (identifier, owner) = entry
                .split_once('=')
                .ok_or_else(|| invalid("PETS", entry))?;
            let identifier = Uuid::parse_str(identifier.trim()).map_err(|_| invalid("PETS", entry))?;
            let owner = owner.trim();
            if owner.is_empty() {
                return Err(invalid("PETS", entry));
            }
            Ok((identifier, owner.to_string()))
        })
        .collect()
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}
