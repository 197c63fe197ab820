use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Account policy switches. Everything off by default keeps the plain
/// registration/login behaviour; see DESIGN.md for why each one exists.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    pub update_last_login: bool,
    pub require_password_match: bool,
    pub enforce_password_strength: bool,
    pub max_image_bytes: usize,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            update_last_login: false,
            require_password_match: false,
            enforce_password_strength: false,
            max_image_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub accounts: AccountsConfig,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "cashcoach".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "cashcoach-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES").unwrap_or(5),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES").unwrap_or(60 * 24),
        };

        let defaults = AccountsConfig::default();
        let accounts = AccountsConfig {
            update_last_login: env_flag("ACCOUNTS_UPDATE_LAST_LOGIN")
                .unwrap_or(defaults.update_last_login),
            require_password_match: env_flag("ACCOUNTS_REQUIRE_PASSWORD_MATCH")
                .unwrap_or(defaults.require_password_match),
            enforce_password_strength: env_flag("ACCOUNTS_ENFORCE_PASSWORD_STRENGTH")
                .unwrap_or(defaults.enforce_password_strength),
            max_image_bytes: env_parse("ACCOUNTS_MAX_IMAGE_BYTES")
                .unwrap_or(defaults.max_image_bytes),
        };

        Ok(Self {
            database_url,
            jwt,
            accounts,
            minio_endpoint: std::env::var("MINIO_ENDPOINT")?,
            minio_bucket: std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "cashcoach".into()),
            minio_access_key: std::env::var("MINIO_ACCESS_KEY")?,
            minio_secret_key: std::env::var("MINIO_SECRET_KEY")?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
