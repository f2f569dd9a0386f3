use std::env;
use std::time::Duration;

use crate::payments::StripeClient;

/// Stripe credentials. Present only when all three are set.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub premium_price_id: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub stripe: Option<StripeConfig>,
    pub discord_webhook_url: Option<String>,
    /// Delay before re-looking up a project the payment metadata names.
    pub reconcile_retry_delay: Duration,
}

/// Non-empty value of an environment variable.
fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LAUNCH_SPACE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let stripe = match (
            non_empty("STRIPE_SECRET_KEY"),
            non_empty("STRIPE_WEBHOOK_SECRET"),
            non_empty("STRIPE_PRICE_ID_PREMIUM"),
        ) {
            (Some(secret_key), Some(webhook_secret), Some(premium_price_id)) => Some(StripeConfig {
                secret_key,
                webhook_secret,
                premium_price_id,
            }),
            _ => None,
        };

        let retry_ms: u64 = env::var("RECONCILE_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "launch_space.db".to_string()),
            base_url,
            dev_mode,
            stripe,
            discord_webhook_url: non_empty("DISCORD_WEBHOOK_URL"),
            reconcile_retry_delay: Duration::from_millis(retry_ms),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stripe_client(&self) -> Option<StripeClient> {
        self.stripe.as_ref().map(|s| {
            StripeClient::new(&s.secret_key, &s.webhook_secret, &s.premium_price_id)
        })
    }
}
