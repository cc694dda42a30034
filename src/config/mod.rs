use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Жёсткий потолок TTL холда: продлений нет, холд всегда истекает
pub const HOLD_TTL_CEILING_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub holds: HoldConfig,
    pub waitlist: WaitlistConfig,
    pub allocation: AllocationConfig,
    pub notifications: NotificationConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

// Настройки базы данных. Без DATABASE_URL сервис работает на in-memory хранилище
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
}

// Настройки Redis. Без REDIS_URL холды живут в памяти процесса
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub fanout_channel: String,
}

// Настройки холдов мест
#[derive(Debug, Clone, Deserialize)]
pub struct HoldConfig {
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub reconcile_interval_ms: u64,
    pub idempotency_ttl_secs: u64,
}

// Настройки листа ожидания
#[derive(Debug, Clone, Deserialize)]
pub struct WaitlistConfig {
    pub offer_window_secs: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    pub max_attempts: u32,
}

// Внешний сервис уведомлений + Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub url: Option<String>,
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl HoldConfig {
    /// Приводит запрошенный клиентом TTL к диапазону `1..=max_ttl_secs`.
    pub fn clamp_ttl(&self, requested: Option<u64>) -> Duration {
        let max = self.max_ttl_secs.clamp(1, HOLD_TTL_CEILING_SECS);
        let secs = requested.unwrap_or(self.default_ttl_secs).clamp(1, max);
        Duration::from_secs(secs)
    }
}

impl WaitlistConfig {
    pub fn offer_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offer_window_secs as i64)
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: HOLD_TTL_CEILING_SECS,
            max_ttl_secs: HOLD_TTL_CEILING_SECS,
            reconcile_interval_ms: 2000,
            idempotency_ttl_secs: 60,
        }
    }
}

impl Default for WaitlistConfig {
    fn default() -> Self {
        Self {
            offer_window_secs: 5,
            sweep_interval_ms: 1000,
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self { max_attempts: 32 }
    }
}

// Локальный профиль без внешней инфраструктуры
impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                host: "127.0.0.1".into(),
                port: 8000,
                environment: "development".into(),
                rust_log: "seat_booking=debug".into(),
                log_format: LogFormat::Pretty,
            },
            database: DatabaseConfig {
                url: None,
                pool_size: 20,
            },
            redis: RedisConfig {
                url: None,
                fanout_channel: "seats:fanout".into(),
            },
            holds: HoldConfig::default(),
            waitlist: WaitlistConfig::default(),
            allocation: AllocationConfig::default(),
            notifications: NotificationConfig {
                url: None,
                failure_threshold: 5,
                open_timeout_secs: 60,
                request_timeout_secs: 5,
            },
        }
    }
}

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = var_or(name, default);
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = var_or("ENVIRONMENT", "development");
        let database_url = optional_var("DATABASE_URL");
        if database_url.is_none() && environment == "production" {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let max_ttl_secs: u64 = parse_var("HOLD_MAX_TTL_SECS", "10")?;
        if max_ttl_secs == 0 || max_ttl_secs > HOLD_TTL_CEILING_SECS {
            return Err(ConfigError::Invalid {
                name: "HOLD_MAX_TTL_SECS",
                value: max_ttl_secs.to_string(),
            });
        }

        Ok(Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parse_var("PORT", "8000")?,
                environment,
                rust_log: var_or("RUST_LOG", "seat_booking=debug,tower_http=debug"),
                log_format: parse_var("LOG_FORMAT", "pretty")?,
            },
            database: DatabaseConfig {
                url: database_url,
                pool_size: parse_var("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: optional_var("REDIS_URL"),
                fanout_channel: var_or("REDIS_FANOUT_CHANNEL", "seats:fanout"),
            },
            holds: HoldConfig {
                default_ttl_secs: parse_var("HOLD_DEFAULT_TTL_SECS", "10")?,
                max_ttl_secs,
                reconcile_interval_ms: parse_var("RECONCILE_INTERVAL_MS", "2000")?,
                idempotency_ttl_secs: parse_var("IDEMPOTENCY_TTL_SECS", "60")?,
            },
            waitlist: WaitlistConfig {
                offer_window_secs: parse_var("OFFER_WINDOW_SECS", "5")?,
                sweep_interval_ms: parse_var("OFFER_SWEEP_INTERVAL_MS", "1000")?,
            },
            allocation: AllocationConfig {
                max_attempts: parse_var("SEAT_ALLOCATION_MAX_ATTEMPTS", "32")?,
            },
            notifications: NotificationConfig {
                url: optional_var("NOTIFICATIONS_URL"),
                failure_threshold: parse_var("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                open_timeout_secs: parse_var("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
                request_timeout_secs: parse_var("NOTIFICATIONS_TIMEOUT_SECONDS", "5")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_clamped_to_ceiling() {
        let holds = HoldConfig::default();
        assert_eq!(holds.clamp_ttl(None), Duration::from_secs(10));
        assert_eq!(holds.clamp_ttl(Some(3)), Duration::from_secs(3));
        assert_eq!(holds.clamp_ttl(Some(0)), Duration::from_secs(1));
        assert_eq!(holds.clamp_ttl(Some(600)), Duration::from_secs(10));
    }

    #[test]
    fn ttl_respects_lower_configured_max() {
        let holds = HoldConfig {
            max_ttl_secs: 4,
            ..HoldConfig::default()
        };
        assert_eq!(holds.clamp_ttl(None), Duration::from_secs(4));
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
