//! Process configuration
//!
//! Flags fall back to environment variables (a `.env` file is honoured by the
//! server binary). Each concern gets a plain settings struct with a `Default`
//! so tests can build isolated services without going through the CLI.

use crate::validation::ComplexityLimits;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "emissions-query")]
#[command(about = "Validated JSON query gateway over a columnar emissions dataset")]
pub struct Args {
    /// Address the HTTP server binds to
    #[arg(long, env = "EQ_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: String,

    /// Manifest enumerating every dataset descriptor
    #[arg(long, env = "EQ_MANIFEST", default_value = "manifest.json")]
    pub manifest: PathBuf,

    /// Pooled read-only connections per database file
    #[arg(long, env = "EQ_POOL_SIZE", default_value_t = 4)]
    pub pool_size: usize,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "EQ_POOL_ACQUIRE_TIMEOUT", default_value_t = 5.0)]
    pub pool_acquire_timeout_secs: f64,

    /// Seconds before an engine query is abandoned
    #[arg(long, env = "EQ_QUERY_TIMEOUT", default_value_t = 30.0)]
    pub query_timeout_secs: f64,

    /// Result cache capacity (entries)
    #[arg(long, env = "EQ_CACHE_CAPACITY", default_value_t = 256)]
    pub cache_capacity: usize,

    /// Result cache time-to-live in seconds
    #[arg(long, env = "EQ_CACHE_TTL", default_value_t = 300.0)]
    pub cache_ttl_secs: f64,

    /// Consecutive failures before the breaker opens
    #[arg(long, env = "EQ_BREAKER_MAX_FAILURES", default_value_t = 5)]
    pub breaker_max_failures: u32,

    /// Seconds the breaker stays open before a trial call
    #[arg(long, env = "EQ_BREAKER_TIMEOUT", default_value_t = 30.0)]
    pub breaker_timeout_secs: f64,

    /// Default row limit when a request omits `limit`
    #[arg(long, env = "EQ_DEFAULT_LIMIT", default_value_t = 1000)]
    pub default_limit: u64,

    /// Hard ceiling on `limit` and `top_n`
    #[arg(long, env = "EQ_MAX_LIMIT", default_value_t = 10_000)]
    pub max_limit: u64,

    /// Chat-completion API base URL
    #[arg(long, env = "EQ_CHAT_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub chat_base_url: String,

    /// Chat-completion API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub chat_api_key: Option<String>,

    /// Chat-completion model
    #[arg(long, env = "EQ_CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub chat_model: String,

    /// Maximum concurrent chat-completion calls
    #[arg(long, env = "EQ_CHAT_MAX_IN_FLIGHT", default_value_t = 8)]
    pub chat_max_in_flight: usize,

    /// Seconds before a chat-completion call is abandoned
    #[arg(long, env = "EQ_CHAT_TIMEOUT", default_value_t = 60.0)]
    pub chat_timeout_secs: f64,

    /// Emit logs as JSON lines
    #[arg(long, env = "EQ_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSettings {
    pub size: usize,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 4,
            acquire_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    pub max_failures: u32,
    pub timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Request-shape ceilings and row-limit policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryLimits {
    pub complexity: ComplexityLimits,
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            complexity: ComplexityLimits::default(),
            default_limit: 1000,
            max_limit: 10_000,
        }
    }
}

impl QueryLimits {
    /// Apply the default when absent and clamp to the ceiling.
    pub fn effective_limit(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_in_flight: usize,
    pub timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_in_flight: 8,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Everything the service needs, grouped by concern.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub manifest: PathBuf,
    pub pool: PoolSettings,
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub limits: QueryLimits,
    pub chat: ChatSettings,
    pub log_json: bool,
}

impl From<Args> for AppConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind_addr,
            manifest: args.manifest,
            pool: PoolSettings {
                size: args.pool_size.max(1),
                acquire_timeout: secs(args.pool_acquire_timeout_secs),
                query_timeout: secs(args.query_timeout_secs),
            },
            cache: CacheSettings {
                capacity: args.cache_capacity.max(1),
                ttl: secs(args.cache_ttl_secs),
            },
            breaker: BreakerSettings {
                max_failures: args.breaker_max_failures.max(1),
                timeout: secs(args.breaker_timeout_secs),
            },
            limits: QueryLimits {
                complexity: ComplexityLimits::default(),
                default_limit: args.default_limit.min(args.max_limit),
                max_limit: args.max_limit,
            },
            chat: ChatSettings {
                base_url: args.chat_base_url,
                api_key: args.chat_api_key,
                model: args.chat_model,
                max_in_flight: args.chat_max_in_flight.max(1),
                timeout: secs(args.chat_timeout_secs),
            },
            log_json: args.log_json,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}
