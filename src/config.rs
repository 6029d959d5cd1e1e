// config.rs
use tracing_subscriber::filter::LevelFilter;

use crate::service::commission::CommissionPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub use_memory_store: bool,
    pub app_url: String,
    pub port: u16,
    pub log_level: LevelFilter,
    pub commission: CommissionPolicy,
}

impl Config {
    pub fn init() -> Config {
        let use_memory_store = env_flag("USE_MEMORY_STORE", false);

        let database_url = std::env::var("DATABASE_URL").ok();
        if database_url.is_none() && !use_memory_store {
            panic!("DATABASE_URL must be set (or USE_MEMORY_STORE=true)");
        }

        let app_url = std::env::var("APP_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let port = env_parse("PORT", 8000u16);
        let database_max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 20u32);

        let log_level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|level| level.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::DEBUG);

        // Commission policy (with defaults)
        let defaults = CommissionPolicy::default();
        let commission = CommissionPolicy::from_rates(
            env_parse("COMMISSION_LEVEL_ONE_RATE", defaults.level_one_rate()),
            env_parse("COMMISSION_DECAY", defaults.decay_divisor),
            env_parse("COMMISSION_MIN_RATE", defaults.min_rate()),
            env_flag("COMMISSION_HALT_ON_STORE_ERROR", defaults.halt_on_store_error),
        );

        Config {
            database_url,
            database_max_connections,
            use_memory_store,
            app_url,
            port,
            log_level,
            commission,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            eprintln!("⚠️  Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    /// Memory-backed configuration with default commission rates.
    pub fn for_tests() -> Config {
        Config {
            database_url: None,
            database_max_connections: 1,
            use_memory_store: true,
            app_url: "http://localhost:3000".to_string(),
            port: 0,
            log_level: LevelFilter::OFF,
            commission: CommissionPolicy::default(),
        }
    }
}
