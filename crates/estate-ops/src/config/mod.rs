use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::workflows::escrow::{EscrowSettings, Money};

const DEFAULT_PLATFORM_FEE_CENTS: i64 = 200;
const DEFAULT_PAYMENTS_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_PAYMENTS_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub payments: PaymentsConfig,
    pub evictions: EvictionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let platform_fee_cents = parse_number(
            "ESCROW_PLATFORM_FEE_CENTS",
            DEFAULT_PLATFORM_FEE_CENTS,
        )?;
        if platform_fee_cents < 0 {
            return Err(ConfigError::InvalidNumber {
                key: "ESCROW_PLATFORM_FEE_CENTS",
            });
        }
        let currency = env::var("ESCROW_CURRENCY")
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_else(|_| "usd".to_string());

        let api_base = env::var("PAYMENTS_API_BASE")
            .unwrap_or_else(|_| DEFAULT_PAYMENTS_API_BASE.to_string());
        let api_key = env::var("PAYMENTS_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let timeout_secs = parse_number("PAYMENTS_TIMEOUT_SECS", DEFAULT_PAYMENTS_TIMEOUT_SECS)?;

        let sweep_interval_secs =
            parse_number("EVICTION_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            payments: PaymentsConfig {
                api_base,
                api_key,
                timeout_secs,
                platform_fee: Money::from_cents(platform_fee_cents),
                currency,
            },
            evictions: EvictionConfig {
                sweep_interval_secs,
            },
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Payment processor connection plus the escrow fee schedule.
#[derive(Clone)]
pub struct PaymentsConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub platform_fee: Money,
    pub currency: String,
}

impl PaymentsConfig {
    pub fn escrow_settings(&self) -> EscrowSettings {
        EscrowSettings {
            platform_fee: self.platform_fee,
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Debug for PaymentsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentsConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("platform_fee", &self.platform_fee)
            .field("currency", &self.currency)
            .finish()
    }
}

/// Scheduling for the eviction expiry sweep. Zero disables the background task.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    pub sweep_interval_secs: u64,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "ESCROW_PLATFORM_FEE_CENTS",
            "ESCROW_CURRENCY",
            "PAYMENTS_API_BASE",
            "PAYMENTS_API_KEY",
            "PAYMENTS_TIMEOUT_SECS",
            "EVICTION_SWEEP_INTERVAL_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.payments.platform_fee, Money::from_cents(200));
        assert_eq!(config.payments.currency, "usd");
        assert!(config.payments.api_key.is_none());
        assert_eq!(config.evictions.sweep_interval_secs, 86_400);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn escrow_fee_and_currency_come_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ESCROW_PLATFORM_FEE_CENTS", "350");
        env::set_var("ESCROW_CURRENCY", " CAD ");
        let config = AppConfig::load().expect("config loads");
        let settings = config.payments.escrow_settings();
        assert_eq!(settings.platform_fee, Money::from_cents(350));
        assert_eq!(settings.currency, "cad");
        reset_env();
    }

    #[test]
    fn rejects_malformed_numbers() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("EVICTION_SWEEP_INTERVAL_SECS", "daily");
        match AppConfig::load() {
            Err(ConfigError::InvalidNumber { key }) => {
                assert_eq!(key, "EVICTION_SWEEP_INTERVAL_SECS")
            }
            other => panic!("expected invalid number, got {other:?}"),
        }

        reset_env();
        env::set_var("ESCROW_PLATFORM_FEE_CENTS", "-5");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidNumber { .. })
        ));
        reset_env();
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = PaymentsConfig {
            api_base: DEFAULT_PAYMENTS_API_BASE.to_string(),
            api_key: Some("sk_test_secret".to_string()),
            timeout_secs: 5,
            platform_fee: Money::from_cents(200),
            currency: "usd".to_string(),
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk_test_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
