use crate::auth::csrf::TokenPolicy;
use crate::vm::hyperbeam::DEFAULT_BASE_URL;
use crate::vm::VmConfig;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound for every duration setting: 30 days.
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_addr: SocketAddr,

    // VM provider
    pub hyperbeam_api_key: Option<String>,
    pub hyperbeam_base_url: String,
    pub demo_mode: bool,
    pub upstream_timeout_secs: u64,
    pub vm: VmConfig,

    // TTLs (in seconds)
    pub session_ttl_secs: u64,
    pub inactivity_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub csrf_token_ttl_secs: u64,

    // Anti-forgery
    pub csrf_single_use: bool,

    // Rate limiting
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,

    // Proxy
    /// Take client identity from `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a reverse proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field(
                "hyperbeam_api_key",
                &self.hyperbeam_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("hyperbeam_base_url", &self.hyperbeam_base_url)
            .field("demo_mode", &self.demo_mode)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("vm", &self.vm)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("inactivity_ttl_secs", &self.inactivity_ttl_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("csrf_token_ttl_secs", &self.csrf_token_ttl_secs)
            .field("csrf_single_use", &self.csrf_single_use)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            hyperbeam_api_key: None,
            hyperbeam_base_url: DEFAULT_BASE_URL.to_string(),
            demo_mode: false,
            upstream_timeout_secs: 15,
            vm: VmConfig::default(),
            session_ttl_secs: 600,
            inactivity_ttl_secs: 30,
            sweep_interval_secs: 60,
            csrf_token_ttl_secs: 300,
            csrf_single_use: false,
            rate_limit_max_requests: 10,
            rate_limit_window_secs: 60,
            trust_proxy_headers: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        // Server
        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;

        // VM provider - API key is required unless running in demo mode
        let demo_mode = parse_env_or_default("DEMO_MODE", defaults.demo_mode)?;
        let hyperbeam_api_key = env::var("HYPERBEAM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        if hyperbeam_api_key.is_none() && !demo_mode {
            return Err(ConfigError::MissingVar("HYPERBEAM_API_KEY".to_string()));
        }
        let hyperbeam_base_url =
            env::var("HYPERBEAM_BASE_URL").unwrap_or(defaults.hyperbeam_base_url);
        let upstream_timeout_secs =
            parse_env_or_default("UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout_secs)?;
        let vm = VmConfig {
            width: parse_env_or_default("VM_WIDTH", defaults.vm.width)?,
            height: parse_env_or_default("VM_HEIGHT", defaults.vm.height)?,
            ..defaults.vm
        };

        // TTLs
        let session_ttl_secs = parse_env_or_default("SESSION_TTL_SECS", defaults.session_ttl_secs)?;
        let inactivity_ttl_secs =
            parse_env_or_default("INACTIVITY_TTL_SECS", defaults.inactivity_ttl_secs)?;
        let sweep_interval_secs =
            parse_env_or_default("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?;
        let csrf_token_ttl_secs =
            parse_env_or_default("CSRF_TOKEN_TTL_SECS", defaults.csrf_token_ttl_secs)?;

        // Anti-forgery
        let csrf_single_use = parse_env_or_default("CSRF_SINGLE_USE", defaults.csrf_single_use)?;

        // Rate limiting
        let rate_limit_max_requests =
            parse_env_or_default("RATE_LIMIT_MAX_REQUESTS", defaults.rate_limit_max_requests)?;
        let rate_limit_window_secs =
            parse_env_or_default("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs)?;

        // Proxy configuration
        let trust_proxy_headers =
            parse_env_or_default("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?;

        let config = Config {
            bind_addr,
            hyperbeam_api_key,
            hyperbeam_base_url,
            demo_mode,
            upstream_timeout_secs,
            vm,
            session_ttl_secs,
            inactivity_ttl_secs,
            sweep_interval_secs,
            csrf_token_ttl_secs,
            csrf_single_use,
            rate_limit_max_requests,
            rate_limit_window_secs,
            trust_proxy_headers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every session or request invalid, or
    /// durations long enough to overflow millisecond timestamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("SESSION_TTL_SECS", self.session_ttl_secs),
            ("INACTIVITY_TTL_SECS", self.inactivity_ttl_secs),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
            ("CSRF_TOKEN_TTL_SECS", self.csrf_token_ttl_secs),
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window_secs),
            ("UPSTREAM_TIMEOUT_SECS", self.upstream_timeout_secs),
        ];
        let non_zero = durations.iter().copied().chain([(
            "RATE_LIMIT_MAX_REQUESTS",
            u64::from(self.rate_limit_max_requests),
        )]);
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    "must be greater than zero".to_string(),
                ));
            }
        }
        for (name, value) in durations {
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    format!("must not exceed {} seconds", MAX_DURATION_SECS),
                ));
            }
        }

        if self.inactivity_ttl_secs > self.session_ttl_secs {
            return Err(ConfigError::InvalidValue(
                "INACTIVITY_TTL_SECS".to_string(),
                "must not exceed SESSION_TTL_SECS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn inactivity_ttl(&self) -> Duration {
        Duration::from_secs(self.inactivity_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn csrf_token_ttl(&self) -> Duration {
        Duration::from_secs(self.csrf_token_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn token_policy(&self) -> TokenPolicy {
        if self.csrf_single_use {
            TokenPolicy::SingleUse
        } else {
            TokenPolicy::Reusable
        }
    }
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
