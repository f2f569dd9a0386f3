mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::notifications::Notifier;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for checkout redirects (e.g., https://launch.example.com)
    pub base_url: String,
    /// None when Stripe is not fully configured.
    pub stripe: Option<StripeClient>,
    pub notifier: Notifier,
    /// Delay before the single re-lookup of a project named in event metadata.
    pub reconcile_retry_delay: Duration,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
