use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Margins applied on top of the capacity ceiling before a telemetry reading
/// is flagged as suspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspectPolicy {
    /// Fraction of the ceiling, e.g. 0.10 for 10%.
    pub tolerance: f64,
    /// Absolute allowance in kW.
    pub tolerance_kw: f64,
}

impl SuspectPolicy {
    pub fn threshold_kw(&self, ceiling_kw: f64) -> f64 {
        ceiling_kw * (1.0 + self.tolerance) + self.tolerance_kw
    }
}

impl Default for SuspectPolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.10,
            tolerance_kw: 0.0,
        }
    }
}

/// Deadline and retry behaviour for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub read_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(10_000),
            max_timeout: Duration::from_millis(60_000),
            read_retries: 2,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl CallPolicy {
    /// Largest value accepted for either timeout setting.
    pub const TIMEOUT_LIMIT: Duration = Duration::from_secs(3600);

    /// Clamp a caller-supplied deadline, falling back to the default.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(d) => d.min(self.max_timeout).max(Duration::from_millis(1)),
            None => self.default_timeout,
        }
    }

    /// Both timeouts must lie in `1ms..=TIMEOUT_LIMIT`.
    pub fn check(&self) -> Result<(), ConfigError> {
        let bounds = Duration::from_millis(1)..=Self::TIMEOUT_LIMIT;
        if !bounds.contains(&self.default_timeout) {
            return Err(invalid(
                "REQUEST_TIMEOUT_MS",
                self.default_timeout.as_millis(),
            ));
        }
        if !bounds.contains(&self.max_timeout) {
            return Err(invalid(
                "MAX_REQUEST_TIMEOUT_MS",
                self.max_timeout.as_millis(),
            ));
        }
        if self.retry_backoff > Self::TIMEOUT_LIMIT {
            return Err(invalid("RETRY_BACKOFF_MS", self.retry_backoff.as_millis()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub auth0_domain: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub bind_address: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub fake: bool,
    pub auth: AuthSettings,
    pub suspect: SuspectPolicy,
    pub calls: CallPolicy,
}

impl GatewayConfig {
    /// Read configuration from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let fake = parse_or::<u8>("FAKE", 0)? != 0;
        let database_url = env::var("DATABASE_URL").ok();
        if database_url.is_none() && !fake {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let calls = CallPolicy {
            default_timeout: Duration::from_millis(parse_or("REQUEST_TIMEOUT_MS", 10_000)?),
            max_timeout: Duration::from_millis(parse_or("MAX_REQUEST_TIMEOUT_MS", 60_000)?),
            read_retries: parse_or("READ_RETRIES", 2)?,
            retry_backoff: Duration::from_millis(parse_or("RETRY_BACKOFF_MS", 100)?),
        };
        calls.check()?;

        let suspect = SuspectPolicy {
            tolerance: parse_or("SUSPECT_TOLERANCE", 0.10)?,
            tolerance_kw: parse_or("SUSPECT_TOLERANCE_KW", 0.0)?,
        };
        if !(suspect.tolerance >= 0.0 && suspect.tolerance.is_finite()) {
            return Err(invalid("SUSPECT_TOLERANCE", suspect.tolerance));
        }
        if !(suspect.tolerance_kw >= 0.0 && suspect.tolerance_kw.is_finite()) {
            return Err(invalid("SUSPECT_TOLERANCE_KW", suspect.tolerance_kw));
        }

        Ok(Self {
            database_url,
            db_pool_size: parse_or("DB_POOL_SIZE", 10)?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 8080)?,
            cors_origins: env::var("ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "local".to_string()),
            fake,
            auth: AuthSettings {
                // In production, set JWT_SECRET or AUTH0_DOMAIN!
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string()),
                auth0_domain: env::var("AUTH0_DOMAIN").ok().filter(|s| !s.is_empty()),
                audience: env::var("AUTH0_API_AUDIENCE").ok().filter(|s| !s.is_empty()),
            },
            suspect,
            calls,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}

fn invalid(name: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
    }
}
