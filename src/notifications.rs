//! Outbound purchase notifications.
//!
//! When `DISCORD_WEBHOOK_URL` is configured, every newly confirmed premium
//! payment is announced to that channel. Delivery is best-effort: it runs in a
//! background task and never affects webhook processing.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

/// Retry delays in milliseconds. Total worst case: 300ms.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

/// A confirmed premium purchase, owned so it can move into a spawned task.
#[derive(Debug, Clone)]
pub struct PremiumPurchase {
    pub project_name: String,
    pub customer_email: Option<String>,
    /// Smallest currency unit (cents)
    pub amount: i64,
    pub currency: String,
}

impl PremiumPurchase {
    /// Message body posted to the channel.
    pub fn message(&self) -> String {
        format!(
            "Tool name: {}, Email: {}, Enter your payment details: You paid {} {}",
            self.project_name,
            self.customer_email.as_deref().unwrap_or("N/A"),
            (self.amount as f64 / 100.0).round(),
            self.currency.to_uppercase()
        )
    }
}

#[derive(Debug, Serialize)]
struct DiscordMessage {
    content: String,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    discord_url: Option<String>,
}

impl Notifier {
    pub fn new(discord_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            discord_url,
        }
    }

    /// A notifier that never sends anything.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.discord_url.is_some()
    }

    /// Spawn a fire-and-forget purchase announcement.
    ///
    /// If no channel is configured, this is a no-op. Panics in the spawned
    /// task are logged rather than silently swallowed.
    pub fn spawn_premium_purchase(&self, purchase: PremiumPurchase) {
        let Some(url) = self.discord_url.clone() else {
            return;
        };
        let client = self.client.clone();
        let project_name = purchase.project_name.clone();
        tokio::spawn(
            AssertUnwindSafe(async move {
                let body = DiscordMessage {
                    content: purchase.message(),
                };
                send_notification(&client, &url, &body).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for project '{}': {}",
                        project_name,
                        panic_msg
                    );
                }
            }),
        );
    }
}

async fn send_notification<T: Serialize>(client: &Client, url: &str, body: &T) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(body)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Notification succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Notification webhook returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Notification webhook failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Notification webhook failed after {} attempts",
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
