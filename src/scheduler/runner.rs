use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::notify::NotificationSink;
use crate::scheduler::cycle::{CycleReport, CycleTrigger, SyncEngine};
use crate::scheduler::messages::{ScheduleStatus, SchedulerError, SchedulerMessage, SlotState};
use crate::subscription::{Subscription, SubscriptionKey};
use crate::MonitorError;

type ReportReply = oneshot::Sender<Result<CycleReport, SchedulerError>>;

/// Timer armed for a slot.
struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
    fire_at: Instant,
    fire_at_utc: DateTime<Utc>,
}

/// Runtime state of one (client, feed) pair.
struct Slot {
    subscription: Subscription,
    sinks: Vec<NotificationSink>,
    state: SlotState,
    timer: Option<ArmedTimer>,
    /// Id of the cycle in flight; results of any other run are stale.
    run_id: u64,
    waiters: Vec<ReportReply>,
    last_report: Option<CycleReport>,
}

impl Slot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
    }
}

/// Scheduler actor.
///
/// Owns every slot; timers and cycles run as separate tasks and report back
/// through the actor's own channel.
pub struct SchedulerActor {
    engine: Arc<SyncEngine>,
    slots: HashMap<SubscriptionKey, Slot>,
    receiver: mpsc::Receiver<SchedulerMessage>,
    /// Held weakly so the actor stops once every handle is dropped.
    sender: mpsc::WeakSender<SchedulerMessage>,
    cycles: Arc<Semaphore>,
    next_id: u64,
}

impl SchedulerActor {
    pub(crate) fn new(
        engine: Arc<SyncEngine>,
        max_concurrent_cycles: usize,
        receiver: mpsc::Receiver<SchedulerMessage>,
        sender: mpsc::WeakSender<SchedulerMessage>,
    ) -> Self {
        Self {
            engine,
            slots: HashMap::new(),
            receiver,
            sender,
            cycles: Arc::new(Semaphore::new(max_concurrent_cycles.max(1))),
            next_id: 0,
        }
    }

    /// Run the actor main loop.
    pub async fn run(mut self) {
        tracing::info!("Scheduler actor started");

        while let Some(msg) = self.receiver.recv().await {
            if !self.handle_message(msg) {
                break;
            }
        }

        self.stop();
        tracing::info!("Scheduler actor stopped");
    }

    /// Handle one message. Returns false when the actor should stop.
    fn handle_message(&mut self, msg: SchedulerMessage) -> bool {
        match msg {
            SchedulerMessage::Upsert {
                key,
                subscription,
                sinks,
                reply,
            } => {
                self.upsert(key, subscription, sinks);
                let _ = reply.send(());
            }

            SchedulerMessage::Remove { key, reply } => {
                let removed = self.remove(&key);
                let _ = reply.send(removed);
            }

            SchedulerMessage::TriggerManual { key, reply } => {
                self.trigger_manual(key, reply);
            }

            SchedulerMessage::ListSchedules { reply } => {
                let _ = reply.send(self.statuses());
            }

            SchedulerMessage::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return false;
            }

            SchedulerMessage::TimerFired { key, generation } => {
                self.timer_fired(key, generation);
            }

            SchedulerMessage::CycleFinished {
                key,
                run_id,
                report,
            } => {
                self.cycle_finished(key, run_id, report);
            }
        }
        true
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn upsert(&mut self, key: SubscriptionKey, subscription: Subscription, sinks: Vec<NotificationSink>) {
        match self.slots.get_mut(&key) {
            Some(slot) => {
                slot.subscription = subscription;
                slot.sinks = sinks;
                slot.cancel_timer();
            }
            None => {
                self.slots.insert(
                    key.clone(),
                    Slot {
                        subscription,
                        sinks,
                        state: SlotState::Idle,
                        timer: None,
                        run_id: 0,
                        waiters: Vec::new(),
                        last_report: None,
                    },
                );
            }
        }

        // A running cycle arms the next timer when it finishes.
        let idle = self
            .slots
            .get(&key)
            .map(|slot| slot.state == SlotState::Idle)
            .unwrap_or(false);
        if idle {
            self.arm_timer(&key);
        }
        tracing::debug!("Scheduled {}", key);
    }

    fn remove(&mut self, key: &SubscriptionKey) -> bool {
        let Some(mut slot) = self.slots.remove(key) else {
            return false;
        };
        slot.cancel_timer();
        for waiter in slot.waiters.drain(..) {
            let _ = waiter.send(Err(SchedulerError::NotScheduled(key.to_string())));
        }
        tracing::debug!("Unscheduled {}", key);
        true
    }

    /// Arm the slot's timer from now, if its subscription wants one.
    fn arm_timer(&mut self, key: &SubscriptionKey) {
        let generation = self.next_id();
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };
        slot.cancel_timer();
        if !slot.subscription.enabled {
            return;
        }
        let Some(interval) = slot.subscription.update_frequency.interval() else {
            return;
        };

        let sender = self.sender.clone();
        let timer_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender
                    .send(SchedulerMessage::TimerFired {
                        key: timer_key,
                        generation,
                    })
                    .await;
            }
        });

        let fire_at_utc = chrono::Duration::from_std(interval)
            .map(|d| Utc::now() + d)
            .unwrap_or_else(|_| Utc::now());
        slot.timer = Some(ArmedTimer {
            generation,
            task,
            fire_at: Instant::now() + interval,
            fire_at_utc,
        });
    }

    fn timer_fired(&mut self, key: SubscriptionKey, generation: u64) {
        let current = self
            .slots
            .get(&key)
            .and_then(|slot| slot.timer.as_ref())
            .map(|timer| timer.generation == generation)
            .unwrap_or(false);
        if !current {
            tracing::debug!("Ignoring stale timer for {}", key);
            return;
        }
        self.start_cycle(key, CycleTrigger::Timer);
    }

    fn trigger_manual(&mut self, key: SubscriptionKey, reply: ReportReply) {
        let Some(slot) = self.slots.get_mut(&key) else {
            let _ = reply.send(Err(SchedulerError::NotScheduled(key.to_string())));
            return;
        };
        if slot.state == SlotState::Running {
            let _ = reply.send(Err(SchedulerError::CycleInProgress(key.to_string())));
            return;
        }
        slot.waiters.push(reply);
        self.start_cycle(key, CycleTrigger::Manual);
    }

    /// Spawn a cycle task for an idle slot.
    fn start_cycle(&mut self, key: SubscriptionKey, trigger: CycleTrigger) {
        let run_id = self.next_id();
        let Some(slot) = self.slots.get_mut(&key) else {
            return;
        };
        if slot.state == SlotState::Running {
            return;
        }
        slot.cancel_timer();
        slot.state = SlotState::Running;
        slot.run_id = run_id;

        let engine = Arc::clone(&self.engine);
        let cycles = Arc::clone(&self.cycles);
        let sender = self.sender.clone();
        let subscription = slot.subscription.clone();
        let sinks = slot.sinks.clone();
        tracing::debug!("Starting {:?} cycle for {}", trigger, key);

        tokio::spawn(async move {
            let Ok(_permit) = cycles.acquire_owned().await else {
                return;
            };
            let cycle_key = key.clone();
            let cycle = tokio::spawn(async move {
                engine
                    .run_cycle(&cycle_key, &subscription, &sinks, trigger)
                    .await
            });
            // A panicking cycle still reports back so the slot leaves Running.
            let report = match cycle.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("Cycle task for {} died: {}", key, e);
                    CycleReport::aborted(
                        key.clone(),
                        trigger,
                        MonitorError::Scheduler(format!("cycle aborted: {}", e)),
                    )
                }
            };
            if let Some(sender) = sender.upgrade() {
                let _ = sender
                    .send(SchedulerMessage::CycleFinished {
                        key,
                        run_id,
                        report,
                    })
                    .await;
            }
        });
    }

    fn cycle_finished(&mut self, key: SubscriptionKey, run_id: u64, report: CycleReport) {
        let Some(slot) = self.slots.get_mut(&key) else {
            tracing::debug!("Discarding result of removed subscription {}", key);
            return;
        };
        if slot.state != SlotState::Running || slot.run_id != run_id {
            tracing::debug!("Discarding stale result for {}", key);
            return;
        }

        slot.state = SlotState::Idle;
        if let Some(last_seen) = &report.last_seen {
            slot.subscription.last_seen = last_seen.clone();
        }
        for waiter in slot.waiters.drain(..) {
            let _ = waiter.send(Ok(report.clone()));
        }
        if report.is_success() {
            tracing::debug!("Cycle for {} completed", key);
        } else {
            tracing::warn!(
                "Cycle for {} completed with errors (failure: {:?}, fetch: {:?}, storage: {:?}, failed sinks: {})",
                key,
                report.failure,
                report.fetch_error,
                report.storage_error,
                report.dispatch.failed()
            );
        }
        slot.last_report = Some(report);

        // The next fire time uses the frequency current at this moment.
        self.arm_timer(&key);
    }

    fn statuses(&self) -> Vec<ScheduleStatus> {
        let now = Instant::now();
        let mut statuses: Vec<ScheduleStatus> = self
            .slots
            .iter()
            .map(|(key, slot)| ScheduleStatus {
                key: key.clone(),
                frequency: slot.subscription.update_frequency,
                enabled: slot.subscription.enabled,
                state: slot.state,
                next_fire_at: slot.timer.as_ref().map(|t| t.fire_at_utc),
                next_fire_in: slot
                    .timer
                    .as_ref()
                    .map(|t| t.fire_at.saturating_duration_since(now)),
                last_report: slot.last_report.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Cancel every timer and fail pending manual triggers.
    fn stop(&mut self) {
        for (_, mut slot) in self.slots.drain() {
            slot.cancel_timer();
            for waiter in slot.waiters.drain(..) {
                let _ = waiter.send(Err(SchedulerError::ServiceUnavailable));
            }
        }
    }
}
