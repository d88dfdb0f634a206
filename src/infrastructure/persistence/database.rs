use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper. Schema init is idempotent (`CREATE TABLE IF NOT EXISTS`) so it
/// is safe to run on every process start.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (pair, timeframe, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candles table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_candles_range ON candles (pair, timeframe, timestamp);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candles index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ema_values (
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                period INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (pair, timeframe, period, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create ema_values table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atr_values (
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                period INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (pair, timeframe, period, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create atr_values table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swings (
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                swing_type TEXT NOT NULL,
                price REAL NOT NULL,
                left_lookback INTEGER NOT NULL,
                right_lookback INTEGER NOT NULL,
                PRIMARY KEY (pair, timeframe, timestamp, swing_type)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create swings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_decisions (
                id TEXT PRIMARY KEY,
                candle_timestamp INTEGER NOT NULL,
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                decision TEXT NOT NULL,
                regime TEXT NOT NULL,
                setup_type TEXT,
                confidence_score REAL NOT NULL,
                reason TEXT NOT NULL,
                trading_window BOOLEAN NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_decisions table")?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_decisions_unique ON strategy_decisions (pair, timeframe, candle_timestamp);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_decisions unique index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                decision_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                details TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_audit_log table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_decision ON strategy_audit_log (decision_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_audit_log index")?;

        // Coordinator-level record of each strategy evaluation run, separate from the
        // decision it produced, so replay/audit works even for runs that errored before a
        // decision was persisted.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_runs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                candle_timestamp INTEGER NOT NULL,
                decision_id TEXT,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                status TEXT NOT NULL,
                error TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_runs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_strategy_runs_job ON strategy_runs (job_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create strategy_runs index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_signals (
                decision_id TEXT PRIMARY KEY,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                rr_ratio REAL NOT NULL,
                risk_percent REAL NOT NULL,
                leverage REAL NOT NULL,
                position_size REAL NOT NULL,
                margin_required REAL NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trade_signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL,
                margin_required REAL NOT NULL,
                realized_pnl REAL,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_events (
                id TEXT PRIMARY KEY,
                position_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create position_events table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_position_events_position ON position_events (position_id);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create position_events index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_balance_events (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                position_id TEXT,
                amount REAL NOT NULL,
                balance_before REAL NOT NULL,
                balance_after REAL NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_balance_events table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_balance_events_account ON account_balance_events (account_id, timestamp);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_balance_events index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                pair TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                config_json TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                started_at INTEGER,
                ended_at INTEGER,
                retry_count INTEGER NOT NULL,
                result_json TEXT,
                error TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create jobs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_active_key ON jobs (job_type, pair, timeframe, status);",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create jobs index")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
