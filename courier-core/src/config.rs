use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub queue: QueueConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub api_port: u16,
    pub jwt_secret: String,
    /// How long a freshly opened socket may sit without sending `connect`.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// An entry with no heartbeat for this long is treated as disconnected,
    /// even if the socket is technically still open.
    pub heartbeat_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a dequeued record stays invisible before it is handed out again.
    pub visibility_timeout_secs: u64,
    /// How long a published record waits for a client ack before redelivery.
    pub ack_timeout_secs: u64,
    /// Failed attempts after which a record is dead-lettered.
    pub max_attempts: u32,
    /// Base delay for redelivery backoff.
    pub retry_initial_ms: u64,
    /// Cap for redelivery backoff.
    pub retry_max_ms: u64,
    /// Worker sweep period; offline records park for one sweep at a time.
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Per-recipient broadcast channel capacity. Slow sessions that fall
    /// behind skip messages and recover via the next backlog sync.
    pub capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                api_port: env::var("API_PORT")
                    .or_else(|_| env::var("PORT"))
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                jwt_secret: env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "your-secret-key-change-in-production".to_string()),
                handshake_timeout_secs: env::var("WS_HANDSHAKE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            registry: RegistryConfig {
                heartbeat_ttl_secs: env::var("REGISTRY_HEARTBEAT_TTL_SECS")
                    .unwrap_or_else(|_| "45".to_string())
                    .parse()
                    .unwrap_or(45),
            },
            queue: QueueConfig {
                visibility_timeout_secs: env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                ack_timeout_secs: env::var("QUEUE_ACK_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                max_attempts: env::var("QUEUE_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                retry_initial_ms: env::var("QUEUE_RETRY_INITIAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
                retry_max_ms: env::var("QUEUE_RETRY_MAX_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30000),
                sweep_interval_ms: env::var("QUEUE_SWEEP_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
            },
            fanout: FanoutConfig {
                capacity: env::var("FANOUT_CAPACITY")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()
                    .unwrap_or(256),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                api_port: 8080,
                jwt_secret: "your-secret-key-change-in-production".to_string(),
                handshake_timeout_secs: 10,
            },
            registry: RegistryConfig {
                heartbeat_ttl_secs: 45,
            },
            queue: QueueConfig {
                visibility_timeout_secs: 30,
                ack_timeout_secs: 30,
                max_attempts: 5,
                retry_initial_ms: 1000,
                retry_max_ms: 30000,
                sweep_interval_ms: 1000,
            },
            fanout: FanoutConfig { capacity: 256 },
        }
    }
}
