use axum::Router;
use chrono::{Datelike, Duration as ChronoDuration, Utc};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launch_space::config::Config;
use launch_space::db::{AppState, create_pool, init_db, queries};
use launch_space::handlers;
use launch_space::models::{CompetitionKind, CreateCompetition, CreateProject, LaunchSlot};
use launch_space::notifications::Notifier;

#[derive(Parser, Debug)]
#[command(name = "launch-space")]
#[command(about = "Premium listing payments and Stripe webhook reconciliation for Launch Space")]
struct Cli {
    /// Seed the database with dev data (next week's competition and a demo project)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing.
/// Creates: next week's weekly competition and a standard project launching in it.
/// Only runs in dev mode.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let today = Utc::now().date_naive();
    let days_to_monday = 7 - i64::from(today.weekday().num_days_from_monday());
    let monday = today + ChronoDuration::days(days_to_monday);
    let week_key = monday.format("%G-W%V").to_string();

    if queries::get_competition_by_key(&conn, &week_key, CompetitionKind::Weekly)
        .expect("Failed to look up competition")
        .is_some()
    {
        tracing::info!("Competition {} already exists, skipping seed", week_key);
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let start = monday
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
        .timestamp();
    let competition = queries::create_competition(
        &conn,
        &CreateCompetition {
            competition_id: week_key.clone(),
            kind: CompetitionKind::Weekly,
            start_date: start,
            end_date: start + 7 * 24 * 60 * 60 - 1,
        },
    )
    .expect("Failed to create dev competition");

    tracing::info!("Competition: {} (id: {})", competition.competition_id, competition.id);

    let project = queries::create_project(
        &conn,
        &CreateProject {
            slug: "demo-tool".to_string(),
            name: "Demo Tool".to_string(),
            submitted_by: "dev_user".to_string(),
            launch: LaunchSlot {
                week: Some(week_key),
                date: Some(start),
                weekly_competition_id: Some(competition.id.clone()),
                month: Some(monday.format("%Y-%m").to_string()),
            },
            ..Default::default()
        },
    )
    .expect("Failed to create dev project");

    tracing::info!("Project: {} (id: {}, owner: {})", project.name, project.id, project.submitted_by);
    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "launch_space=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let stripe = config.stripe_client();
    if stripe.is_none() {
        tracing::warn!(
            "Stripe is not configured (STRIPE_SECRET_KEY, STRIPE_WEBHOOK_SECRET, STRIPE_PRICE_ID_PREMIUM); webhooks and upgrades will fail"
        );
    }

    let notifier = Notifier::new(config.discord_webhook_url.clone());
    if !notifier.is_enabled() {
        tracing::info!("DISCORD_WEBHOOK_URL not set, purchase notifications disabled");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        stripe,
        notifier,
        reconcile_retry_delay: config.reconcile_retry_delay,
    };

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set LAUNCH_SPACE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = Router::new()
        .merge(handlers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // Track if we should clean up on exit
    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Launch Space server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        // Also remove WAL and SHM files if they exist
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
