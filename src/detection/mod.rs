//! Detection engine: discovery, per-token evaluation, and the fan-out into
//! the alert pipeline. One `run_detection` pass is the unit of work a
//! scheduler tick executes.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{AlertDispatcher, AlertFactory};
use crate::config::Config;
use crate::storage::{NewToken, SignalCandidate, Storage, Token, Window};
use crate::subscriptions::Subscriptions;

pub mod context;
pub mod rules;
pub mod scorer;
pub mod signal_store;

pub use context::{ContextBuilder, DetectionContext};
pub use rules::{rule_table, ScoringRule};
pub use scorer::{classify, evaluate, Evaluation};
pub use signal_store::SignalStore;

/// What one full discovery+scoring pass accomplished, including under
/// partial failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionSummary {
    pub tokens_evaluated: usize,
    pub signals_upserted: usize,
    pub alerts_created: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySummary {
    pub discovered: usize,
    pub added: usize,
}

pub struct Engine {
    storage: Arc<Storage>,
    config: Arc<Config>,
    context_builder: ContextBuilder,
    signal_store: SignalStore,
    alert_factory: AlertFactory,
    dispatcher: Arc<AlertDispatcher>,
    rules: Vec<ScoringRule>,
}

impl Engine {
    pub fn new(
        storage: Arc<Storage>,
        config: Arc<Config>,
        subscriptions: Arc<dyn Subscriptions>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        let context_builder =
            ContextBuilder::new(storage.clone(), config.detection.top_positions);
        let signal_store =
            SignalStore::new(storage.clone(), config.detection.default_chain.clone());
        let alert_factory = AlertFactory::new(
            storage.clone(),
            subscriptions,
            config.alerting.clone(),
        );

        Self {
            storage,
            config,
            context_builder,
            signal_store,
            alert_factory,
            dispatcher,
            rules: rule_table(),
        }
    }

    /// One full pass: discovery first, then score every active token.
    /// Failures local to one token are logged and counted; the pass always
    /// completes and reports what it managed.
    #[instrument(skip(self))]
    pub async fn run_detection(&self) -> anyhow::Result<DetectionSummary> {
        // Discovery runs synchronously before scoring so freshly observed
        // tokens are active when the rules see them; its failure must not
        // abort the scoring pass.
        if let Err(e) = self.run_discovery().await {
            warn!("Discovery pass failed, scoring continues on known tokens: {}", e);
        }

        let now = Utc::now().timestamp();
        let window = Window::ending_at(now, self.config.detection.window_secs);
        let tokens = self.storage.list_active_tokens().await?;

        let mut summary = DetectionSummary::default();
        for token in tokens {
            summary.tokens_evaluated += 1;
            match self.evaluate_token(&token, window).await {
                Ok(outcome) => {
                    if outcome.signal_upserted {
                        summary.signals_upserted += 1;
                    }
                    summary.alerts_created += outcome.alerts_created;
                }
                Err(e) => {
                    error!("Evaluation failed for token {}: {}", token.id, e);
                    summary.failures += 1;
                }
            }
        }

        info!(
            "Detection pass complete: {} tokens, {} signals, {} alerts, {} failures",
            summary.tokens_evaluated,
            summary.signals_upserted,
            summary.alerts_created,
            summary.failures
        );
        Ok(summary)
    }

    /// Register tokens observed in recent transactions but missing from the
    /// catalog, so the next scoring pass picks them up.
    #[instrument(skip(self))]
    pub async fn run_discovery(&self) -> anyhow::Result<DiscoverySummary> {
        let since = Utc::now().timestamp() - self.config.detection.discovery_lookback_secs;
        let unknown = self.storage.uncataloged_token_ids(since).await?;

        let mut summary = DiscoverySummary {
            discovered: unknown.len(),
            added: 0,
        };
        for token_id in unknown {
            if token_id.trim().is_empty() {
                debug!("Skipping activity row with empty token reference");
                continue;
            }
            let symbol = token_id
                .trim_start_matches("0x")
                .chars()
                .take(6)
                .collect::<String>()
                .to_uppercase();
            self.storage
                .ensure_token(&NewToken {
                    chain: self.config.detection.default_chain.clone(),
                    address: token_id.clone(),
                    symbol,
                    decimals: 18,
                })
                .await?;
            summary.added += 1;
        }

        if summary.added > 0 {
            info!(
                "Discovery: {} unknown tokens seen, {} added to catalog",
                summary.discovered, summary.added
            );
        }
        Ok(summary)
    }

    async fn evaluate_token(&self, token: &Token, window: Window) -> anyhow::Result<TokenOutcome> {
        let ctx = self.context_builder.build(token.clone(), window).await?;
        let evaluation = evaluate(&ctx, &self.rules, &self.config.rules);
        debug!(
            "Token {} scored {:.1} ({} rule scores)",
            token.id,
            evaluation.score,
            evaluation.breakdown.len()
        );

        let Some(signal_type) = classify(evaluation.score, &self.config.detection) else {
            return Ok(TokenOutcome::default());
        };

        let candidate = SignalCandidate {
            token_id: token.id.clone(),
            score: evaluation.score,
            signal_type,
            window,
            wallets_involved: rules::involved_wallets(&ctx, &self.config.rules),
        };

        let Some(upsert) = self.signal_store.upsert(candidate).await? else {
            return Ok(TokenOutcome::default());
        };
        let signal = upsert.into_signal();

        let mut outcome = TokenOutcome {
            signal_upserted: true,
            alerts_created: 0,
        };
        if evaluation.score >= self.config.alerting.alert_score_threshold {
            outcome.alerts_created = self.alert_factory.create_alerts_for_signal(&signal).await?;
            if outcome.alerts_created > 0 {
                self.dispatch_alerts_for_signal(&signal.id).await?;
            }
        }
        Ok(outcome)
    }

    /// Dispatch every PENDING alert attached to a signal. Per-alert failures
    /// are absorbed by the dispatcher's status bookkeeping.
    pub async fn dispatch_alerts_for_signal(&self, signal_id: &str) -> anyhow::Result<()> {
        let dispatched = self.dispatcher.dispatch_for_signal(signal_id).await?;
        debug!("Dispatched {} alerts for signal {}", dispatched, signal_id);
        Ok(())
    }

    /// Re-enter dispatch for PENDING alerts that aged past the redelivery
    /// delay (idempotent; a delivered alert leaves the queue).
    pub async fn process_pending_alerts(&self) -> anyhow::Result<()> {
        let swept = self.dispatcher.process_pending_alerts().await?;
        if swept > 0 {
            info!("Pending-alert sweep dispatched {} alerts", swept);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TokenOutcome {
    signal_upserted: bool,
    alerts_created: usize,
}
