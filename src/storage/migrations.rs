//! Schema bootstrap for the engine's SQLite store.
//!
//! Statements are idempotent (`IF NOT EXISTS`) and run once at connect time.

use sqlx::SqlitePool;
use tracing::info;

use super::StorageError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tokens (
        id TEXT PRIMARY KEY,
        chain TEXT NOT NULL,
        address TEXT NOT NULL,
        symbol TEXT NOT NULL,
        decimals INTEGER NOT NULL DEFAULT 18,
        is_active INTEGER NOT NULL DEFAULT 1,
        UNIQUE (chain, address)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token_id TEXT NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        amount REAL NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet_balances (
        token_id TEXT NOT NULL,
        address TEXT NOT NULL,
        balance REAL NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (token_id, address)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dex_swaps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token_id TEXT NOT NULL,
        wallet TEXT NOT NULL,
        amount_usd REAL NOT NULL,
        side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS liquidity_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token_id TEXT NOT NULL,
        delta_usd REAL NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS signals (
        id TEXT PRIMARY KEY,
        token_id TEXT NOT NULL,
        score REAL NOT NULL,
        signal_type TEXT NOT NULL CHECK (signal_type IN ('WHALE_INFLOW', 'CONCENTRATED_BUYS')),
        window_start INTEGER NOT NULL,
        window_end INTEGER NOT NULL,
        wallets_involved TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        signal_id TEXT,
        token_id TEXT NOT NULL,
        alert_type TEXT NOT NULL CHECK (alert_type IN ('ACCUMULATION', 'WHALE_MOVEMENT')),
        channel_telegram INTEGER NOT NULL DEFAULT 0,
        channel_email INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL CHECK (status IN ('PENDING', 'DELIVERED', 'FAILED')),
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        delivered_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscribers (
        user_id INTEGER PRIMARY KEY,
        telegram_chat_id TEXT,
        email TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        token_id TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        UNIQUE (user_id, token_id)
    )
    "#,
    // Indexes for the hot read paths
    "CREATE INDEX IF NOT EXISTS idx_transactions_token_time ON transactions(token_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_wallet_balances_token ON wallet_balances(token_id, balance DESC)",
    "CREATE INDEX IF NOT EXISTS idx_dex_swaps_token_time ON dex_swaps(token_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_liquidity_token_time ON liquidity_events(token_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_signals_token_window ON signals(token_id, window_start)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_status_created ON alerts(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_dedup ON alerts(user_id, alert_type, token_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_token ON subscriptions(token_id, is_active)",
];

pub async fn run(pool: &SqlitePool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
    }
    info!("Schema ready ({} statements applied)", SCHEMA.len());
    Ok(())
}
