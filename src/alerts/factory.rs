//! Alert creation: one PENDING alert per eligible recipient of a
//! high-confidence signal, deduplicated against a short trailing window so
//! overlapping detection runs cannot double-create.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::AlertingConfig;
use crate::storage::{
    AlertChannels, AlertMetadata, AlertType, NewAlert, Signal, Storage,
};
use crate::subscriptions::Subscriptions;

pub struct AlertFactory {
    storage: Arc<Storage>,
    subscriptions: Arc<dyn Subscriptions>,
    config: AlertingConfig,
}

impl AlertFactory {
    pub fn new(
        storage: Arc<Storage>,
        subscriptions: Arc<dyn Subscriptions>,
        config: AlertingConfig,
    ) -> Self {
        Self {
            storage,
            subscriptions,
            config,
        }
    }

    /// Returns how many alerts were created. Signals under the
    /// high-confidence threshold create none.
    pub async fn create_alerts_for_signal(&self, signal: &Signal) -> anyhow::Result<usize> {
        if signal.score < self.config.alert_score_threshold {
            debug!(
                "Signal {} score {:.1} under alert threshold {:.1}, no fan-out",
                signal.id, signal.score, self.config.alert_score_threshold
            );
            return Ok(0);
        }

        let users = self.subscriptions.eligible_users(&signal.token_id).await?;
        let since = Utc::now().timestamp() - self.config.dedup_window_minutes * 60;

        let mut created = 0;
        for user_id in users {
            let recent = self
                .storage
                .find_recent_alert(user_id, AlertType::Accumulation, &signal.token_id, since)
                .await?;
            if let Some(existing) = recent {
                debug!(
                    "User {} already has alert {} for token {} in the dedup window",
                    user_id, existing.id, signal.token_id
                );
                continue;
            }

            let channels = self
                .storage
                .latest_alert_channels(user_id, &signal.token_id)
                .await?
                .unwrap_or_else(AlertChannels::default);

            self.storage
                .create_alert(NewAlert {
                    user_id,
                    signal_id: Some(signal.id.clone()),
                    token_id: signal.token_id.clone(),
                    alert_type: AlertType::Accumulation,
                    channels,
                    metadata: AlertMetadata::Accumulation {
                        score: signal.score,
                        signal_type: signal.signal_type,
                        wallets_involved: signal.wallets_involved.0.clone(),
                    },
                })
                .await?;
            created += 1;
        }

        if created > 0 {
            info!(
                "Created {} alerts for signal {} (token {})",
                created, signal.id, signal.token_id
            );
        }
        Ok(created)
    }
}
