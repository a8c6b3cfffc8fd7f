use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub rate_limit: RateLimitSettings,
    pub storage: StorageSettings,
}

/// Where the WebSocket server binds, how long a peer may take to finish the
/// upgrade handshake, and how long a single frame write may take.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub handshake_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

/// Sizing of the hub queue and the per-connection outbound queues.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub event_queue_capacity: usize,
    pub outbound_buffer: usize,
}

/// Per-origin token bucket parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitSettings {
    pub per_second: u32,
    pub burst: u32,
}

/// Location and retention policy of the sled database.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageSettings {
    pub path: String,
    pub message_ttl_secs: Option<i64>,
    pub max_messages_per_topic: Option<usize>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub rate_limit: Option<PartialRateLimitSettings>,
    pub storage: Option<PartialStorageSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub handshake_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub event_queue_capacity: Option<usize>,
    pub outbound_buffer: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRateLimitSettings {
    pub per_second: Option<u32>,
    pub burst: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
    pub message_ttl_secs: Option<i64>,
    pub max_messages_per_topic: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                handshake_timeout_ms: 10_000,
                write_timeout_ms: 5000,
            },
            broker: BrokerSettings {
                max_connections: 1000,
                event_queue_capacity: 1024,
                outbound_buffer: 256,
            },
            rate_limit: RateLimitSettings {
                per_second: 10,
                burst: 5,
            },
            storage: StorageSettings {
                path: "chanhub_db".to_string(),
                message_ttl_secs: None,
                max_messages_per_topic: None,
            },
        }
    }
}

impl Settings {
    /// Fill every value missing from `partial` with the default.
    pub fn merged(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let rate_limit = partial.rate_limit.unwrap_or_default();
        let storage = partial.storage.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                handshake_timeout_ms: server
                    .handshake_timeout_ms
                    .unwrap_or(default.server.handshake_timeout_ms),
                write_timeout_ms: server
                    .write_timeout_ms
                    .unwrap_or(default.server.write_timeout_ms),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(default.broker.max_connections),
                event_queue_capacity: broker
                    .event_queue_capacity
                    .unwrap_or(default.broker.event_queue_capacity),
                outbound_buffer: broker
                    .outbound_buffer
                    .unwrap_or(default.broker.outbound_buffer),
            },
            rate_limit: RateLimitSettings {
                per_second: rate_limit
                    .per_second
                    .unwrap_or(default.rate_limit.per_second),
                burst: rate_limit.burst.unwrap_or(default.rate_limit.burst),
            },
            storage: StorageSettings {
                path: storage.path.unwrap_or(default.storage.path),
                message_ttl_secs: storage
                    .message_ttl_secs
                    .or(default.storage.message_ttl_secs),
                max_messages_per_topic: storage
                    .max_messages_per_topic
                    .or(default.storage.max_messages_per_topic),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
