use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

use crate::domain::{DurationSpec, PackageConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub referrals: ReferralConfig,
    #[serde(default = "default_packages")]
    pub packages: Vec<PackageConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound for a single store round-trip issued by a service.
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared HS256 secret of the identity provider.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    /// Users registering with this email start out as admins.
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub uploads_dir: String,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferralConfig {
    pub cooldown_hours: i64,
    pub punishment_hours: i64,
    pub max_strikes: i32,
    pub credit_reward_minutes: i64,
    pub pending_expiry_days: i64,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: 72,
            punishment_hours: 72,
            max_strikes: 5,
            credit_reward_minutes: 60,
            pending_expiry_days: 30,
        }
    }
}

fn default_packages() -> Vec<PackageConfig> {
    vec![
        PackageConfig {
            id: "1h".to_string(),
            name: "1 hora".to_string(),
            price: 300,
            duration: DurationSpec::Minutes(60),
        },
        PackageConfig {
            id: "2h".to_string(),
            name: "2 horas".to_string(),
            price: 500,
            duration: DurationSpec::Text("2 horas".to_string()),
        },
        PackageConfig {
            id: "1d".to_string(),
            name: "1 día".to_string(),
            price: 1500,
            duration: DurationSpec::Text("1 día".to_string()),
        },
        PackageConfig {
            id: "1w".to_string(),
            name: "1 semana".to_string(),
            price: 7000,
            duration: DurationSpec::Text("7 días".to_string()),
        },
    ]
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://wifi-credits.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.operation_timeout_secs", 10)?
            .set_default("auth.jwt_issuer", "wifi-credits")?
            .set_default("storage.uploads_dir", "uploads")?
            .set_default("storage.public_base_url", "http://localhost:8080")?
            .set_default("storage.max_upload_bytes", 10 * 1024 * 1024)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with WIFI_CREDITS__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("WIFI_CREDITS").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://wifi-credits.db?mode=rwc".to_string(),
                max_connections: 10,
                operation_timeout_secs: 10,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                jwt_issuer: "wifi-credits".to_string(),
                bootstrap_admin_email: None,
            },
            storage: StorageConfig {
                uploads_dir: "uploads".to_string(),
                public_base_url: "http://localhost:8080".to_string(),
                max_upload_bytes: 10 * 1024 * 1024,
            },
            referrals: ReferralConfig::default(),
            packages: default_packages(),
        }
    }
}
