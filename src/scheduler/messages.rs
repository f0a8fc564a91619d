use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::notify::NotificationSink;
use crate::scheduler::cycle::CycleReport;
use crate::subscription::{Subscription, SubscriptionKey, UpdateFrequency};
use crate::MonitorError;

/// Scheduler error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("subscription not scheduled: {0}")]
    NotScheduled(String),

    #[error("cycle already running: {0}")]
    CycleInProgress(String),

    #[error("scheduler unavailable")]
    ServiceUnavailable,
}

impl From<SchedulerError> for MonitorError {
    fn from(e: SchedulerError) -> Self {
        MonitorError::Scheduler(e.to_string())
    }
}

/// State of one subscription slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for the timer or a manual trigger.
    Idle,
    /// A cycle is in progress.
    Running,
}

/// Schedule information of one subscription.
#[derive(Debug, Clone)]
pub struct ScheduleStatus {
    pub key: SubscriptionKey,
    pub frequency: UpdateFrequency,
    pub enabled: bool,
    pub state: SlotState,
    /// Wall-clock time of the next timer cycle.
    pub next_fire_at: Option<DateTime<Utc>>,
    /// Time until the next timer cycle.
    pub next_fire_in: Option<Duration>,
    pub last_report: Option<CycleReport>,
}

/// Scheduler actor message type.
pub(crate) enum SchedulerMessage {
    /// Create or replace a subscription's schedule.
    Upsert {
        key: SubscriptionKey,
        subscription: Subscription,
        sinks: Vec<NotificationSink>,
        reply: oneshot::Sender<()>,
    },

    /// Drop a subscription's schedule.
    Remove {
        key: SubscriptionKey,
        reply: oneshot::Sender<bool>,
    },

    /// Run a cycle now and reply with its report.
    TriggerManual {
        key: SubscriptionKey,
        reply: oneshot::Sender<Result<CycleReport, SchedulerError>>,
    },

    /// Status of every slot.
    ListSchedules {
        reply: oneshot::Sender<Vec<ScheduleStatus>>,
    },

    /// Cancel every timer and stop.
    Shutdown { reply: oneshot::Sender<()> },

    /// Internal: a slot's timer expired.
    TimerFired {
        key: SubscriptionKey,
        generation: u64,
    },

    /// Internal: a cycle task completed.
    CycleFinished {
        key: SubscriptionKey,
        run_id: u64,
        report: CycleReport,
    },
}
