use std::{env, fmt, net::SocketAddr, path::PathBuf};

use super::{server_bind_address, DEFAULT_DATABASE_URL, DEFAULT_INVOICE_DIR};

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Merchant identity printed on every invoice, resolved from `MERCHANT_*`
/// environment variables. All fields are plain strings; the renderer decides
/// how to lay them out.
#[derive(Debug, Clone)]
pub struct MerchantConfig {
    pub name: String,
    /// Postal address; `|` separates printed lines.
    pub address: String,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Prefix placed before every monetary value, e.g. `Rs.` or `$`.
    pub currency_prefix: String,
    /// IANA timezone name used to format invoice dates.
    pub timezone: String,
}

impl MerchantConfig {
    fn from_env() -> Self {
        Self {
            name: env::var("MERCHANT_NAME").unwrap_or_else(|_| "Orderdesk Store".to_string()),
            address: env::var("MERCHANT_ADDRESS").unwrap_or_default(),
            tax_id: non_empty(env::var("MERCHANT_TAX_ID").ok()),
            email: non_empty(env::var("MERCHANT_EMAIL").ok()),
            phone: non_empty(env::var("MERCHANT_PHONE").ok()),
            currency_prefix: env::var("INVOICE_CURRENCY_PREFIX")
                .unwrap_or_else(|_| "Rs.".to_string()),
            timezone: env::var("MERCHANT_TIMEZONE").unwrap_or_else(|_| "Asia/Kolkata".to_string()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// Directory where generated invoice PDFs are written and served from.
    pub invoice_dir: PathBuf,
    /// Shared secret for webhook signature verification; unset disables the check.
    pub webhook_secret: Option<String>,
    pub merchant: MerchantConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let invoice_dir = PathBuf::from(
            env::var("INVOICE_DIR").unwrap_or_else(|_| DEFAULT_INVOICE_DIR.to_string()),
        );
        let webhook_secret = non_empty(env::var("WEBHOOK_SECRET").ok());

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            invoice_dir,
            webhook_secret,
            merchant: MerchantConfig::from_env(),
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}
