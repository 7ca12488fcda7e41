use crate::credentials::DEFAULT_MIN_PASSWORD_LENGTH;
use crate::validation::parse_region;

/// Which [`EntityStore`](crate::store::EntityStore) backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required for the postgres backend.
    pub database_url: Option<String>,
    pub port: u16,
    pub run_migrations: bool,
    /// Proposal emails are only logged when unset.
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_token: Option<String>,
    /// ISO 3166 alpha-2 region used for phone numbers without a country code.
    pub phone_default_region: String,
    pub portal_min_password_length: usize,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_bool(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false", name),
    }
}

fn validate_database_url(url: String) -> anyhow::Result<String> {
    if url.trim().is_empty() {
        anyhow::bail!("DB_URL cannot be empty");
    }
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
    }
    Ok(url)
}

fn validate_http_url(name: &str, url: String) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    url::Url::parse(&url).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    Ok(url)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let store_backend: StoreBackend = non_empty_var("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()?;

        let database_url = match std::env::var("DB_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => Some(validate_database_url(url)?),
            Err(_) if store_backend == StoreBackend::Postgres => {
                anyhow::bail!("DB_URL or DATABASE_URL environment variable required")
            }
            Err(_) => None,
        };

        let phone_default_region = non_empty_var("PHONE_DEFAULT_REGION")
            .unwrap_or_else(|| "US".to_string())
            .to_ascii_uppercase();
        parse_region(&phone_default_region)
            .map_err(|_| anyhow::anyhow!("PHONE_DEFAULT_REGION '{}' is not a known region", phone_default_region))?;

        let config = Self {
            store_backend,
            database_url,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            run_migrations: match non_empty_var("RUN_MIGRATIONS") {
                Some(raw) => parse_bool("RUN_MIGRATIONS", &raw)?,
                None => true,
            },
            notify_webhook_url: non_empty_var("NOTIFY_WEBHOOK_URL")
                .map(|url| validate_http_url("NOTIFY_WEBHOOK_URL", url))
                .transpose()?,
            notify_webhook_token: non_empty_var("NOTIFY_WEBHOOK_TOKEN"),
            phone_default_region,
            portal_min_password_length: match non_empty_var("PORTAL_MIN_PASSWORD_LENGTH") {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    anyhow::anyhow!("PORTAL_MIN_PASSWORD_LENGTH must be a positive number")
                })?,
                None => DEFAULT_MIN_PASSWORD_LENGTH,
            },
        };

        if config.portal_min_password_length == 0 {
            anyhow::bail!("PORTAL_MIN_PASSWORD_LENGTH must be a positive number");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Store backend: {:?}", config.store_backend);
        if let Some(url) = &config.database_url {
            tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]);
        }
        match &config.notify_webhook_url {
            Some(url) => tracing::info!("Notification webhook configured: {}", url),
            None => tracing::info!("No notification webhook configured; proposal emails are logged only"),
        }
        tracing::debug!("Phone default region: {}", config.phone_default_region);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_database_url_scheme() {
        assert!(validate_database_url("postgres://localhost/q2c".into()).is_ok());
        assert!(validate_database_url("mysql://localhost/q2c".into()).is_err());
        assert!(validate_database_url("  ".into()).is_err());
    }

    #[test]
    fn test_webhook_url_scheme() {
        assert!(validate_http_url("U", "https://hooks.example.com/proposals".into()).is_ok());
        assert!(validate_http_url("U", "ftp://example.com".into()).is_err());
    }
}
