use tokio::sync::{mpsc, oneshot};

use crate::notify::NotificationSink;
use crate::scheduler::cycle::CycleReport;
use crate::scheduler::messages::{ScheduleStatus, SchedulerError, SchedulerMessage};
use crate::subscription::{Subscription, SubscriptionKey};

/// Public interface of the scheduler actor.
///
/// Talks to the actor over a channel; cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerMessage>,
}

impl SchedulerHandle {
    pub(crate) fn new(sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage,
    ) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| SchedulerError::ServiceUnavailable)?;
        rx.await.map_err(|_| SchedulerError::ServiceUnavailable)
    }

    /// Create or replace the schedule of a subscription.
    ///
    /// Any armed timer is cancelled and a new one is armed from now using the
    /// subscription's frequency. Manual and disabled subscriptions get no timer.
    pub async fn upsert(
        &self,
        key: SubscriptionKey,
        subscription: Subscription,
        sinks: Vec<NotificationSink>,
    ) -> Result<(), SchedulerError> {
        self.request(|reply| SchedulerMessage::Upsert {
            key,
            subscription,
            sinks,
            reply,
        })
        .await
    }

    /// Cancel a subscription's timer and drop its slot.
    ///
    /// An in-flight cycle completes and its result is discarded. Returns
    /// false if the subscription was not scheduled.
    pub async fn remove(&self, key: SubscriptionKey) -> Result<bool, SchedulerError> {
        self.request(|reply| SchedulerMessage::Remove { key, reply })
            .await
    }

    /// Run a cycle immediately and wait for its report.
    ///
    /// # Returns
    /// * `Ok(report)` - The cycle ran
    /// * `Err(SchedulerError::NotScheduled)` - Unknown subscription
    /// * `Err(SchedulerError::CycleInProgress)` - A cycle for it is running
    pub async fn trigger_manual_sync(
        &self,
        key: SubscriptionKey,
    ) -> Result<CycleReport, SchedulerError> {
        self.request(|reply| SchedulerMessage::TriggerManual { key, reply })
            .await?
    }

    /// Get the status of every scheduled subscription.
    pub async fn list_schedules(&self) -> Result<Vec<ScheduleStatus>, SchedulerError> {
        self.request(|reply| SchedulerMessage::ListSchedules { reply })
            .await
    }

    /// Cancel all timers and stop the actor.
    ///
    /// Cycles already running finish in the background; their results are dropped.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(|reply| SchedulerMessage::Shutdown { reply })
            .await
    }
}
