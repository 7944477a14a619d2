use std::str::FromStr;

use serde::Deserialize;

/// Which delivery provider the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Logs the message instead of sending it. Local development only.
    Log,
    Resend,
    Sendgrid,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(ProviderKind::Log),
            "resend" => Ok(ProviderKind::Resend),
            "sendgrid" => Ok(ProviderKind::Sendgrid),
            other => Err(anyhow::anyhow!(
                "EMAIL_PROVIDER must be one of log, resend, sendgrid (got '{}')",
                other
            )),
        }
    }
}

/// How triggered notifications reach the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Enqueue a job and let the worker deliver it.
    Queued,
    /// Render and send inline from the trigger call.
    Direct,
}

impl FromStr for DeliveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(DeliveryMode::Queued),
            "direct" => Ok(DeliveryMode::Direct),
            other => Err(anyhow::anyhow!(
                "EMAIL_DELIVERY_MODE must be queued or direct (got '{}')",
                other
            )),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// API listen address (default: 0.0.0.0:3000)
    pub api_bind_addr: String,

    /// Public base URL used to build unsubscribe links
    pub public_base_url: String,

    /// HS256 secret for operator bearer tokens
    pub admin_jwt_secret: String,

    /// HMAC key for unsubscribe tokens
    pub unsubscribe_secret: String,

    /// Shared secret expected on inbound provider webhooks
    pub webhook_secret: String,

    pub email_provider: ProviderKind,

    /// Resend API key, required when `email_provider = resend`
    pub resend_api_key: Option<String>,

    /// SendGrid API key, required when `email_provider = sendgrid`
    pub sendgrid_api_key: Option<String>,

    /// Email sender address
    pub email_from: String,

    pub delivery_mode: DeliveryMode,

    /// Directory holding handlebars templates
    pub template_dir: String,

    /// Jobs claimed per worker tick (default: 25)
    pub worker_batch_size: i64,

    /// Idle sleep between worker ticks in milliseconds (default: 5000)
    pub worker_poll_interval_ms: u64,

    /// A `sending` job older than this is handed back to the queue (default: 900)
    pub worker_stale_claim_secs: u64,

    /// First retry delay in seconds (default: 300)
    pub retry_base_delay_secs: u64,

    /// Upper bound on any retry delay in seconds (default: 21600)
    pub retry_max_delay_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let email_provider: ProviderKind = or_default("EMAIL_PROVIDER", "log").parse()?;
        let resend_api_key = lookup("RESEND_API_KEY");
        let sendgrid_api_key = lookup("SENDGRID_API_KEY");

        match email_provider {
            ProviderKind::Resend if resend_api_key.is_none() => {
                anyhow::bail!("RESEND_API_KEY is required when EMAIL_PROVIDER=resend")
            }
            ProviderKind::Sendgrid if sendgrid_api_key.is_none() => {
                anyhow::bail!("SENDGRID_API_KEY is required when EMAIL_PROVIDER=sendgrid")
            }
            _ => {}
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_var(&or_default("DB_MAX_CONNECTIONS", "20"), "DB_MAX_CONNECTIONS")?,
            api_bind_addr: or_default("API_BIND_ADDR", "0.0.0.0:3000"),
            public_base_url: or_default("PUBLIC_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            admin_jwt_secret: required("ADMIN_JWT_SECRET")?,
            unsubscribe_secret: required("UNSUBSCRIBE_SECRET")?,
            webhook_secret: required("WEBHOOK_SECRET")?,
            email_provider,
            resend_api_key,
            sendgrid_api_key,
            email_from: or_default("EMAIL_FROM", "Studio <no-reply@localhost>"),
            delivery_mode: or_default("EMAIL_DELIVERY_MODE", "queued").parse()?,
            template_dir: or_default("TEMPLATE_DIR", "templates"),
            worker_batch_size: parse_var(&or_default("WORKER_BATCH_SIZE", "25"), "WORKER_BATCH_SIZE")?,
            worker_poll_interval_ms: parse_var(
                &or_default("WORKER_POLL_INTERVAL_MS", "5000"),
                "WORKER_POLL_INTERVAL_MS",
            )?,
            worker_stale_claim_secs: parse_var(
                &or_default("WORKER_STALE_CLAIM_SECS", "900"),
                "WORKER_STALE_CLAIM_SECS",
            )?,
            retry_base_delay_secs: parse_var(
                &or_default("RETRY_BASE_DELAY_SECS", "300"),
                "RETRY_BASE_DELAY_SECS",
            )?,
            retry_max_delay_secs: parse_var(
                &or_default("RETRY_MAX_DELAY_SECS", "21600"),
                "RETRY_MAX_DELAY_SECS",
            )?,
        })
    }
}

fn parse_var<T: FromStr>(raw: &str, key: &str) -> anyhow::Result<T> {
    raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "{} must be a valid {}",
            key,
            std::any::type_name::<T>()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/postbox"),
            ("ADMIN_JWT_SECRET", "admin-secret"),
            ("UNSUBSCRIBE_SECRET", "unsub-secret"),
            ("WEBHOOK_SECRET", "hook-secret"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<AppConfig> {
        AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.email_provider, ProviderKind::Log);
        assert_eq!(config.delivery_mode, DeliveryMode::Queued);
        assert_eq!(config.worker_batch_size, 25);
        assert_eq!(config.retry_base_delay_secs, 300);
        assert_eq!(config.retry_max_delay_secs, 21_600);
        assert_eq!(config.public_base_url, "http://localhost:3000");
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let mut env = base_env();
        env.remove("WEBHOOK_SECRET");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_SECRET"));
    }

    #[test]
    fn test_blank_secret_is_fatal() {
        let mut env = base_env();
        env.insert("UNSUBSCRIBE_SECRET", "   ");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_selected_provider_needs_key() {
        let mut env = base_env();
        env.insert("EMAIL_PROVIDER", "resend");
        assert!(load(&env).is_err());

        env.insert("RESEND_API_KEY", "re_123");
        let config = load(&env).unwrap();
        assert_eq!(config.email_provider, ProviderKind::Resend);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut env = base_env();
        env.insert("EMAIL_PROVIDER", "carrier-pigeon");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut env = base_env();
        env.insert("WORKER_BATCH_SIZE", "lots");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("WORKER_BATCH_SIZE"));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let mut env = base_env();
        env.insert("PUBLIC_BASE_URL", "https://studio.example/");
        assert_eq!(load(&env).unwrap().public_base_url, "https://studio.example");
    }
}
