//! End-to-end pass over an in-memory database: seeded accumulation activity
//! scores a token, persists a signal, fans out an alert, and delivers it
//! through a stub channel. A second pass right after keeps the signal row
//! and, with the first alert already terminal, fans out afresh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use whalewatch::alerts::{AlertDispatcher, ChannelError, NotificationChannel};
use whalewatch::config::Config;
use whalewatch::detection::Engine;
use whalewatch::storage::{AlertStatus, NewToken, Signal, SignalType, Storage};
use whalewatch::subscriptions::{Contact, SqliteSubscriptions};

struct RecordingChannel {
    sends: AtomicUsize,
}

impl RecordingChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sends: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, _contact: &Contact, _message: &str) -> Result<(), ChannelError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

const TOKEN: &str = "0xfeedface";

/// Twelve wallets each pull 250k out of the market maker in five slices.
/// Half of them already sit in the holder table (feeding the inflow rule),
/// the other half look like fresh whales.
async fn seed_accumulation(storage: &Storage) {
    storage
        .ensure_token(&NewToken {
            chain: "ethereum".to_string(),
            address: TOKEN.to_string(),
            symbol: "FEEDFA".to_string(),
            decimals: 18,
        })
        .await
        .unwrap();

    let base = Utc::now().timestamp() - 600;
    for i in 0..12 {
        let buyer = format!("0xbuyer{:02}", i);
        for slice in 0..5 {
            storage
                .record_transaction(TOKEN, "0xmarket", &buyer, 50_000.0, base + i * 5 + slice)
                .await
                .unwrap();
        }
        if i < 6 {
            storage
                .record_wallet_balance(TOKEN, &buyer, 150_000.0)
                .await
                .unwrap();
        }
    }

    storage
        .upsert_subscriber(7, Some("100200300"), Some("whale@example.com"))
        .await
        .unwrap();
    storage.upsert_subscription(7, Some(TOKEN)).await.unwrap();
}

async fn stored_signals(storage: &Storage) -> Vec<Signal> {
    sqlx::query_as::<_, Signal>(
        r#"
        SELECT id, token_id, score, signal_type, window_start, window_end,
               wallets_involved, created_at
        FROM signals WHERE token_id = ?
        "#,
    )
    .bind(TOKEN)
    .fetch_all(storage.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn accumulation_activity_becomes_a_delivered_alert() {
    let storage = Arc::new(Storage::connect_in_memory().await.unwrap());
    seed_accumulation(&storage).await;

    let config = Arc::new(Config::default());
    let subscriptions = Arc::new(SqliteSubscriptions::new(storage.clone()));
    let channel = RecordingChannel::new();
    let dispatcher = Arc::new(AlertDispatcher::new(
        storage.clone(),
        subscriptions.clone(),
        vec![channel.clone()],
        config.alerting.clone(),
    ));
    let engine = Engine::new(storage.clone(), config, subscriptions, dispatcher);

    let summary = engine.run_detection().await.unwrap();
    assert_eq!(summary.tokens_evaluated, 1);
    assert_eq!(summary.signals_upserted, 1);
    assert_eq!(summary.alerts_created, 1);
    assert_eq!(summary.failures, 0);

    let signals = stored_signals(&storage).await;
    assert_eq!(signals.len(), 1);
    let signal = &signals[0];
    assert_eq!(signal.signal_type, SignalType::WhaleInflow);
    assert!(signal.score >= 80.0, "score was {:.1}", signal.score);
    assert_eq!(signal.wallets_involved.0.len(), 12);

    let delivered = storage
        .list_alerts_for_signal(&signal.id, AlertStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].user_id, 7);
    assert!(delivered[0].channel_email);
    assert!(delivered[0].delivered_at.is_some());
    assert_eq!(channel.sends.load(Ordering::SeqCst), 1);

    // A second pass moments later hits the same window: the signal is kept
    // rather than duplicated. The first alert already reached its terminal
    // DELIVERED state, and only PENDING alerts suppress creation, so the
    // user gets a fresh alert and a second send.
    let summary = engine.run_detection().await.unwrap();
    assert_eq!(summary.alerts_created, 1);
    assert_eq!(stored_signals(&storage).await.len(), 1);
    assert_eq!(channel.sends.load(Ordering::SeqCst), 2);

    let delivered = storage
        .list_alerts_for_signal(&signals[0].id, AlertStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 2);
}
