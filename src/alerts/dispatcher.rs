//! Alert dispatch: resolve configured channels, attempt each in isolation,
//! and fold the partial results into one terminal status per attempt.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::AlertingConfig;
use crate::storage::{Alert, AlertMetadata, AlertStatus, Storage, StorageError};
use crate::subscriptions::{Contact, Subscriptions};

use super::channels::NotificationChannel;

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status: AlertStatus,
    pub errors: Vec<String>,
}

pub struct AlertDispatcher {
    storage: Arc<Storage>,
    subscriptions: Arc<dyn Subscriptions>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    config: AlertingConfig,
}

impl AlertDispatcher {
    pub fn new(
        storage: Arc<Storage>,
        subscriptions: Arc<dyn Subscriptions>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        config: AlertingConfig,
    ) -> Self {
        Self {
            storage,
            subscriptions,
            channels,
            config,
        }
    }

    /// One dispatch attempt. DELIVERED when at least one channel accepted
    /// the message; FAILED otherwise, including when the alert carries no
    /// usable channel at all. The alert row is updated exactly once.
    pub async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome, StorageError> {
        let contact = match self.subscriptions.contact(alert.user_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                warn!("No contact on file for user {}", alert.user_id);
                Contact::default()
            }
            Err(e) => {
                warn!("Contact lookup failed for user {}: {}", alert.user_id, e);
                Contact::default()
            }
        };

        let flags = alert.channels();
        let mut errors = Vec::new();
        let mut delivered = false;

        if flags.none() {
            errors.push("no delivery channels configured on alert".to_string());
        }

        let mut requested: Vec<&'static str> = Vec::new();
        if flags.telegram {
            requested.push("telegram");
        }
        if flags.email {
            requested.push("email");
        }

        let message = render_message(alert);
        for name in requested {
            match self.channel(name) {
                None => errors.push(format!("{}: unknown channel", name)),
                Some(channel) if !channel.is_configured() => {
                    // Soft error: keep trying the other channels
                    errors.push(format!("{}: not configured", name));
                }
                Some(channel) => match channel.send(&contact, &message).await {
                    Ok(()) => {
                        debug!("Alert {} delivered via {}", alert.id, name);
                        delivered = true;
                    }
                    Err(e) => errors.push(format!("{}: {}", name, e)),
                },
            }
        }

        let (status, delivered_at) = if delivered {
            (AlertStatus::Delivered, Some(Utc::now().timestamp()))
        } else {
            (AlertStatus::Failed, None)
        };
        self.storage
            .update_alert_status(&alert.id, status, delivered_at)
            .await?;

        if status == AlertStatus::Failed {
            warn!("Alert {} failed on all channels: {:?}", alert.id, errors);
        }
        Ok(DispatchOutcome { status, errors })
    }

    /// Dispatch every PENDING alert attached to one signal.
    pub async fn dispatch_for_signal(&self, signal_id: &str) -> Result<usize, StorageError> {
        let alerts = self
            .storage
            .list_alerts_for_signal(signal_id, AlertStatus::Pending)
            .await?;
        let mut dispatched = 0;
        for alert in alerts {
            match self.dispatch(&alert).await {
                Ok(_) => dispatched += 1,
                Err(e) => error!("Dispatch of alert {} errored: {}", alert.id, e),
            }
        }
        Ok(dispatched)
    }

    /// Bounded sweep of PENDING alerts older than the redelivery delay.
    /// One alert's failure never stops the batch.
    pub async fn process_pending_alerts(&self) -> Result<usize, StorageError> {
        let cutoff = Utc::now().timestamp() - self.config.redelivery_delay_secs;
        let batch = self
            .storage
            .list_pending_alerts(cutoff, self.config.sweep_batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        info!("Sweeping {} pending alerts", batch.len());
        let mut dispatched = 0;
        for alert in batch {
            match self.dispatch(&alert).await {
                Ok(outcome) => {
                    dispatched += 1;
                    debug!("Swept alert {}: {:?}", alert.id, outcome.status);
                }
                Err(e) => error!("Sweep dispatch of alert {} errored: {}", alert.id, e),
            }
        }
        Ok(dispatched)
    }

    fn channel(&self, name: &str) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.iter().find(|c| c.name() == name)
    }
}

fn render_message(alert: &Alert) -> String {
    match &alert.metadata.0 {
        AlertMetadata::Accumulation {
            score,
            signal_type,
            wallets_involved,
        } => format!(
            "Accumulation detected on {}: score {:.0} ({:?}), {} wallets involved",
            alert.token_id,
            score,
            signal_type,
            wallets_involved.len()
        ),
        AlertMetadata::WhaleMovement {
            amount,
            from_address,
            to_address,
        } => format!(
            "Whale movement on {}: {:.0} from {} to {}",
            alert.token_id, amount, from_address, to_address
        ),
    }
}
