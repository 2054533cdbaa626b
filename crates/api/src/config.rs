//! Application configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which room store backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::Invalid("ROOM_STORE must be 'redis' or 'memory'")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` on its own, before the rest of the config is loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .parse()
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::Invalid("LOG_FORMAT must be 'pretty' or 'json'")),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub client_origin: String,
    pub log_format: LogFormat,

    // Room store
    pub room_store: StoreBackend,
    pub redis_url: String,
    pub room_ttl_empty_secs: u64,
    pub room_ttl_content_secs: u64,
    pub room_check_timeout_ms: u64,
    pub room_sweep_interval_secs: u64,

    // Uploads
    pub upload_dir: String,
    pub max_upload_bytes: usize,

    // WebSocket
    pub admission_ticket_ttl_secs: u64,
    pub ws_queue_capacity: usize,
    pub ws_max_message_bytes: usize,
    pub ws_ping_interval_secs: u64,
    pub ws_idle_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| {
                let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
                format!("0.0.0.0:{port}")
            }),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            log_format: LogFormat::from_env()?,

            // Room store
            room_store: env::var("ROOM_STORE")
                .unwrap_or_else(|_| "redis".to_string())
                .parse()?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| {
                let addr = env::var("REDIS_ADDR").unwrap_or_else(|_| "localhost:6379".to_string());
                format!("redis://{addr}")
            }),
            room_ttl_empty_secs: env::var("ROOM_TTL_EMPTY_SECS")
                .unwrap_or_else(|_| "86400".to_string()) // 24 hours
                .parse()
                .unwrap_or(86400),
            room_ttl_content_secs: env::var("ROOM_TTL_CONTENT_SECS")
                .unwrap_or_else(|_| "604800".to_string()) // 7 days
                .parse()
                .unwrap_or(604800),
            room_check_timeout_ms: env::var("ROOM_CHECK_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            room_sweep_interval_secs: env::var("ROOM_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),

            // Uploads
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| "209715200".to_string()) // 200MB
                .parse()
                .unwrap_or(209715200),

            // WebSocket
            admission_ticket_ttl_secs: env::var("ADMISSION_TICKET_TTL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            ws_queue_capacity: env::var("WS_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .unwrap_or(256),
            ws_max_message_bytes: env::var("WS_MAX_MESSAGE_BYTES")
                .unwrap_or_else(|_| "4194304".to_string()) // 4MB
                .parse()
                .unwrap_or(4194304),
            ws_ping_interval_secs: env::var("WS_PING_INTERVAL_SECS")
                .unwrap_or_else(|_| "54".to_string())
                .parse()
                .unwrap_or(54),
            ws_idle_timeout_secs: env::var("WS_IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_queue_capacity == 0 {
            return Err(ConfigError::Invalid("WS_QUEUE_CAPACITY must be at least 1"));
        }
        if self.room_check_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ROOM_CHECK_TIMEOUT_MS must be at least 1"));
        }
        if self.ws_ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("WS_PING_INTERVAL_SECS must be at least 1"));
        }
        if self.ws_idle_timeout_secs <= self.ws_ping_interval_secs {
            return Err(ConfigError::Invalid(
                "WS_IDLE_TIMEOUT_SECS must be longer than WS_PING_INTERVAL_SECS",
            ));
        }
        // A ticket must outlive the existence check it covers
        if self.admission_ticket_ttl() <= self.room_check_timeout() {
            return Err(ConfigError::Invalid(
                "ADMISSION_TICKET_TTL_SECS must be longer than ROOM_CHECK_TIMEOUT_MS",
            ));
        }
        Ok(())
    }

    pub fn room_ttl_empty(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.room_ttl_empty_secs).unwrap_or(i64::MAX))
    }

    pub fn room_ttl_content(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.room_ttl_content_secs).unwrap_or(i64::MAX))
    }

    pub fn room_check_timeout(&self) -> Duration {
        Duration::from_millis(self.room_check_timeout_ms)
    }

    /// `None` when the sweep is disabled
    pub fn room_sweep_interval(&self) -> Option<Duration> {
        (self.room_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.room_sweep_interval_secs))
    }

    pub fn admission_ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.admission_ticket_ttl_secs)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_secs)
    }

    pub fn ws_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_idle_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
