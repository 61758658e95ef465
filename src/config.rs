//! Configuration for basepilot.
//!
//! Everything is env-driven: `main` loads `.env` via dotenvy, then
//! [`Config::from_env`] resolves each section once. Every setting except
//! `GEMINI_API_KEY` has a default, so a bare environment boots against the
//! simulated chain. Empty variables count as unset.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::chain;
use crate::error::ConfigError;
use crate::exec::ExecutorTiming;
use crate::gateway::auth::DEFAULT_SESSION_TTL_SECS;
use crate::llm::gemini;
use crate::tools::weather;

/// Main configuration for the runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub llm: gemini::GeminiConfig,
    pub weather: WeatherConfig,
    pub custody: CustodyConfig,
    pub executor: ExecutorTiming,
    pub client: ClientConfig,
}

/// HTTP gateway bind address and session lifetime.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub session_ttl_secs: i64,
}

/// Weather tool backend; the tool stays registered without a key and
/// reports the missing key only when called.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub base_url: Url,
    pub api_key: Option<SecretString>,
}

/// Custodial spender used when enumerating grants on behalf of the agent.
/// `None` means "use the smart account the chain backend provisions", which
/// is the only spender the simulator can actually pull into.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    pub spender: Option<String>,
}

/// Chat-client settings. Without a key the client runs on a throwaway
/// random wallet.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub wallet_key: Option<SecretString>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve()?,
            llm: resolve_llm()?,
            weather: WeatherConfig::resolve()?,
            custody: CustodyConfig::resolve()?,
            executor: resolve_executor_timing()?,
            client: ClientConfig::resolve()?,
        })
    }
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let host = optional_env("GATEWAY_HOST")?.unwrap_or_else(|| "127.0.0.1".to_string());
        let port = optional_env("GATEWAY_PORT")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "GATEWAY_PORT".to_string(),
                message: format!("must be a valid port number: {e}"),
            })?
            .unwrap_or(3000);
        if port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEWAY_PORT".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let session_ttl_secs = optional_env("SESSION_TTL_SECS")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "SESSION_TTL_SECS".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);
        if session_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_TTL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            session_ttl_secs,
        })
    }

    /// The resolved bind address. Hostnames go through the resolver, so
    /// `localhost` works alongside plain IPs.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::InvalidValue {
                key: "GATEWAY_HOST".to_string(),
                message: format!("'{}:{}' is not a bindable address: {e}", self.host, self.port),
            })?
            .next()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "GATEWAY_HOST".to_string(),
                message: format!("'{}' did not resolve to an address", self.host),
            })
    }
}

fn resolve_llm() -> Result<gemini::GeminiConfig, ConfigError> {
    let api_key = SecretString::from(required_env("GEMINI_API_KEY")?);
    let model =
        optional_env("GEMINI_MODEL")?.unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string());
    let base_url = optional_env("GEMINI_BASE_URL")?
        .map(|raw| Url::parse(&raw))
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: "GEMINI_BASE_URL".to_string(),
            message: format!("must be a valid URL: {e}"),
        })?
        .unwrap_or_else(|| {
            Url::parse(gemini::DEFAULT_BASE_URL).expect("default endpoint is a valid URL")
        });
    Ok(gemini::GeminiConfig::new(base_url, model, api_key))
}

impl WeatherConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let base_url = optional_env("OPENWEATHER_BASE_URL")?
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "OPENWEATHER_BASE_URL".to_string(),
                message: format!("must be a valid URL: {e}"),
            })?
            .unwrap_or_else(|| {
                Url::parse(weather::DEFAULT_BASE_URL).expect("default endpoint is a valid URL")
            });
        Ok(Self {
            base_url,
            api_key: optional_env("OPENWEATHER_API_KEY")?.map(SecretString::from),
        })
    }
}

impl CustodyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let spender = optional_env("SPENDER_ADDRESS")?
            .map(|raw| {
                chain::normalize_address(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: "SPENDER_ADDRESS".to_string(),
                    message: format!("'{raw}' is not a 0x-prefixed 20-byte hex address"),
                })
            })
            .transpose()?;
        Ok(Self { spender })
    }
}

fn resolve_executor_timing() -> Result<ExecutorTiming, ConfigError> {
    let defaults = ExecutorTiming::default();
    Ok(ExecutorTiming {
        settle_delay: resolve_delay_ms("SETTLE_DELAY_MS", defaults.settle_delay)?,
        approve_delay: resolve_delay_ms("APPROVE_DELAY_MS", defaults.approve_delay)?,
    })
}

fn resolve_delay_ms(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = optional_env(key)?
        .map(|s| s.parse::<u64>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a positive integer of milliseconds: {e}"),
        })?;
    match millis {
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        }),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

impl ClientConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            wallet_key: optional_env("WALLET_PRIVATE_KEY")?.map(SecretString::from),
        })
    }
}

/// Reads an env var, treating empty and whitespace-only values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn required_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use secrecy::ExposeSecret;

    use super::*;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_config_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("GATEWAY_HOST");
            std::env::remove_var("GATEWAY_PORT");
            std::env::remove_var("SESSION_TTL_SECS");
            std::env::remove_var("GEMINI_API_KEY");
            std::env::remove_var("GEMINI_MODEL");
            std::env::remove_var("GEMINI_BASE_URL");
            std::env::remove_var("OPENWEATHER_API_KEY");
            std::env::remove_var("OPENWEATHER_BASE_URL");
            std::env::remove_var("SPENDER_ADDRESS");
            std::env::remove_var("SETTLE_DELAY_MS");
            std::env::remove_var("APPROVE_DELAY_MS");
            std::env::remove_var("WALLET_PRIVATE_KEY");
        }
    }

    #[test]
    fn from_env_uses_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_config_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "test-key");
        }

        let config = Config::from_env().expect("config resolves");
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.gateway.session_ttl_secs, DEFAULT_SESSION_TTL_SECS);
        assert_eq!(config.llm.model, gemini::DEFAULT_MODEL);
        assert_eq!(config.llm.base_url.as_str(), gemini::DEFAULT_BASE_URL);
        assert_eq!(config.llm.api_key.expose_secret(), "test-key");
        assert!(config.weather.api_key.is_none());
        assert!(config.custody.spender.is_none());
        assert_eq!(config.executor.settle_delay, Duration::from_secs(5));
        assert_eq!(config.executor.approve_delay, Duration::from_secs(3));
        assert!(config.client.wallet_key.is_none());

        let addr = config.gateway.socket_addr().expect("resolves");
        assert_eq!(addr.port(), 3000);

        clear_config_env();
    }

    #[test]
    fn from_env_applies_overrides() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_config_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "test-key");
            std::env::set_var("GATEWAY_HOST", "0.0.0.0");
            std::env::set_var("GATEWAY_PORT", "8080");
            std::env::set_var("SESSION_TTL_SECS", "900");
            std::env::set_var("GEMINI_MODEL", "gemini-2.5-pro");
            std::env::set_var("GEMINI_BASE_URL", "http://127.0.0.1:9090/v1beta");
            std::env::set_var("OPENWEATHER_API_KEY", "weather-key");
            std::env::set_var(
                "SPENDER_ADDRESS",
                "0x2222222222222222222222222222222222222222",
            );
            std::env::set_var("SETTLE_DELAY_MS", "50");
            std::env::set_var("APPROVE_DELAY_MS", "30");
            std::env::set_var("WALLET_PRIVATE_KEY", "0xabc123");
        }

        let config = Config::from_env().expect("config resolves");
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.session_ttl_secs, 900);
        assert_eq!(config.llm.model, "gemini-2.5-pro");
        assert_eq!(config.llm.base_url.as_str(), "http://127.0.0.1:9090/v1beta");
        assert_eq!(
            config
                .weather
                .api_key
                .as_ref()
                .expect("weather key")
                .expose_secret(),
            "weather-key"
        );
        assert_eq!(
            config.custody.spender.as_deref(),
            Some("0x2222222222222222222222222222222222222222")
        );
        assert_eq!(config.executor.settle_delay, Duration::from_millis(50));
        assert_eq!(config.executor.approve_delay, Duration::from_millis(30));
        assert!(config.client.wallet_key.is_some());

        clear_config_env();
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_config_env();

        let err = Config::from_env().expect_err("no api key");
        match err {
            ConfigError::MissingEnvVar(key) => assert_eq!(key, "GEMINI_API_KEY"),
            other => panic!("unexpected error: {other}"),
        }

        // An empty value counts as unset too.
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "   ");
        }
        let err = Config::from_env().expect_err("blank api key");
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));

        clear_config_env();
    }

    #[test]
    fn invalid_values_name_the_key() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_config_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "test-key");
            std::env::set_var("GATEWAY_PORT", "not-a-port");
        }
        let err = Config::from_env().expect_err("bad port");
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "GATEWAY_PORT"),
            other => panic!("unexpected error: {other}"),
        }

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_PORT", "3000");
            std::env::set_var("GEMINI_BASE_URL", "not a url");
        }
        let err = Config::from_env().expect_err("bad url");
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "GEMINI_BASE_URL"),
            other => panic!("unexpected error: {other}"),
        }

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("GEMINI_BASE_URL");
            std::env::set_var("SPENDER_ADDRESS", "0x123");
        }
        let err = Config::from_env().expect_err("bad spender");
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "SPENDER_ADDRESS"),
            other => panic!("unexpected error: {other}"),
        }

        clear_config_env();
    }

    #[test]
    fn zero_delays_and_ttls_are_rejected() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_config_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "test-key");
            std::env::set_var("SETTLE_DELAY_MS", "0");
        }
        let err = Config::from_env().expect_err("zero delay");
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "SETTLE_DELAY_MS"),
            other => panic!("unexpected error: {other}"),
        }

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("SETTLE_DELAY_MS");
            std::env::set_var("SESSION_TTL_SECS", "0");
        }
        let err = Config::from_env().expect_err("zero ttl");
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "SESSION_TTL_SECS"),
            other => panic!("unexpected error: {other}"),
        }

        clear_config_env();
    }

    #[test]
    fn spender_addresses_are_normalized() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_config_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var(
                "SPENDER_ADDRESS",
                "  0xAbCd222222222222222222222222222222222222 ",
            );
        }
        let custody = CustodyConfig::resolve().expect("resolves");
        assert_eq!(
            custody.spender.as_deref(),
            Some("0xabcd222222222222222222222222222222222222")
        );

        clear_config_env();
    }

    #[test]
    fn hostnames_resolve_to_bindable_addresses() {
        let gateway = GatewayConfig {
            host: "localhost".to_string(),
            port: 4000,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        };
        let addr = gateway.socket_addr().expect("localhost resolves");
        assert_eq!(addr.port(), 4000);
        assert!(addr.ip().is_loopback());
    }
}
