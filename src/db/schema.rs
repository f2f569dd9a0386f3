use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Submitted listings. Booleans are 0/1, timestamps unix seconds.
        -- NULL in a premium perk column means the perk was never granted (or was stripped).
        CREATE TABLE IF NOT EXISTS apps (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            submitted_by TEXT NOT NULL,

            plan TEXT NOT NULL DEFAULT 'standard' CHECK (plan IN ('standard', 'premium')),
            plan_price INTEGER,
            is_draft INTEGER NOT NULL DEFAULT 0,
            payment_status INTEGER NOT NULL DEFAULT 0,
            order_id TEXT,
            payment_date INTEGER,
            checkout_session_id TEXT,
            payment_initiated_at INTEGER,

            premium_badge INTEGER,
            skip_queue INTEGER,
            social_promotion INTEGER,
            guaranteed_backlinks INTEGER,
            homepage_duration INTEGER,
            link_type TEXT NOT NULL DEFAULT 'nofollow' CHECK (link_type IN ('dofollow', 'nofollow')),
            dofollow_status INTEGER NOT NULL DEFAULT 0,
            dofollow_reason TEXT,
            dofollow_awarded_at INTEGER,

            launch_week TEXT,
            launch_date INTEGER,
            weekly_competition_id TEXT,
            launch_month TEXT,

            -- Shadow set, only populated while an upgrade awaits payment
            pending_launch_week TEXT,
            pending_launch_date INTEGER,
            pending_weekly_competition_id TEXT,
            pending_launch_month TEXT,
            original_launch_week TEXT,
            original_launch_date INTEGER,
            original_weekly_competition_id TEXT,
            original_launch_month TEXT,

            scheduled_launch INTEGER NOT NULL DEFAULT 0,
            status TEXT,
            chargeback_dispute_id TEXT,
            chargeback_reason TEXT,
            chargeback_created_at INTEGER,
            payment_failed_at INTEGER,
            payment_failure_reason TEXT,

            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_apps_owner_slug ON apps(submitted_by, slug);
        CREATE INDEX IF NOT EXISTS idx_apps_checkout_session ON apps(checkout_session_id);
        CREATE INDEX IF NOT EXISTS idx_apps_order ON apps(order_id);

        -- Processed gateway transactions. app_id is NULL for orphans awaiting a project.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            app_id TEXT,
            plan TEXT NOT NULL CHECK (plan IN ('standard', 'premium')),
            amount INTEGER NOT NULL,
            currency TEXT NOT NULL,
            payment_id TEXT NOT NULL,
            invoice_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('completed', 'refunded', 'disputed')),
            metadata TEXT NOT NULL DEFAULT '{}',
            paid_at INTEGER NOT NULL,
            refunded_at INTEGER,
            disputed_at INTEGER,
            dispute_id TEXT,
            created_at INTEGER NOT NULL
        );
        -- At most one completed payment per gateway reference
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_completed_ref
            ON payments(payment_id) WHERE status = 'completed';
        CREATE INDEX IF NOT EXISTS idx_payments_ref ON payments(payment_id, status);
        CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id);
        CREATE INDEX IF NOT EXISTS idx_payments_orphans ON payments(user_id) WHERE app_id IS NULL;

        -- Weekly/monthly voting buckets
        CREATE TABLE IF NOT EXISTS competitions (
            id TEXT PRIMARY KEY,
            competition_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('weekly', 'monthly')),
            start_date INTEGER NOT NULL,
            end_date INTEGER NOT NULL,
            total_submissions INTEGER NOT NULL DEFAULT 0,
            premium_submissions INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(competition_id, kind)
        );

        -- Verified inbound webhook deliveries
        CREATE TABLE IF NOT EXISTS webhook_logs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            event_id TEXT,
            event_type TEXT,
            signature TEXT,
            body TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            result TEXT,
            processed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_source_time ON webhook_logs(source, received_at);
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_event ON webhook_logs(event_id);
        "#,
    )
}
