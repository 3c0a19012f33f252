use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span, warn};

use super::notify::{Notification, Notifier};
use crate::finance::{BillableEvent, RollupEngine};

/// Hands side effects of a committed write to background tasks.
///
/// Delivery is at most once: the caller never waits for the outcome, a
/// failure is logged and dropped, and nothing is retried.
#[derive(Clone)]
pub struct Dispatcher {
    rollups: RollupEngine,
    notifier: Arc<dyn Notifier>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("rollups", &self.rollups)
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(rollups: RollupEngine, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            rollups,
            notifier,
            tracker: TaskTracker::new(),
        }
    }

    pub fn rollups(&self) -> &RollupEngine {
        &self.rollups
    }

    pub fn billable(&self, event: BillableEvent) {
        let rollups = self.rollups.clone();
        let span = info_span!(
            "dispatch.rollup",
            consultation_type = %event.consultation_type,
            task_id = event.task_id.as_deref().unwrap_or_default(),
        );
        self.tracker.spawn(
            async move {
                match rollups.record(&event).await {
                    Ok(outcome) => debug!(
                        monthly = %outcome.monthly,
                        daily = %outcome.daily,
                        "rollup recorded"
                    ),
                    // The triggering write is already committed; this increment is lost.
                    Err(err) => warn!(error = %err, price = %event.price, "rollup failed"),
                }
            }
            .instrument(span),
        );
    }

    pub fn notify(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        let span = info_span!(
            "dispatch.notify",
            template = notification.template.as_str(),
        );
        self.tracker.spawn(
            async move {
                if let Err(err) = notifier.send(&notification).await {
                    warn!(error = %err, recipient = %notification.recipient, "notification failed");
                }
            }
            .instrument(span),
        );
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every side effect spawned so far has finished. New work can
    /// still be dispatched afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
