//! Per-subscription scheduling for RSS Monitor.
//!
//! Every (client, feed) pair gets a slot in the scheduler actor. A slot is
//! either idle, with an optional timer armed at `now + frequency`, or running
//! a cycle. A pair never runs two cycles at once; the next timer is armed
//! when a cycle finishes.

mod cycle;
mod handle;
mod messages;
mod runner;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::SchedulerConfig;

pub use cycle::{CycleReport, CycleTrigger, SyncEngine};
pub use handle::SchedulerHandle;
pub use messages::{ScheduleStatus, SchedulerError, SlotState};
pub use runner::SchedulerActor;

/// Start the scheduler actor on the current runtime.
pub fn spawn(engine: Arc<SyncEngine>, config: &SchedulerConfig) -> SchedulerHandle {
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let actor = SchedulerActor::new(
        engine,
        config.max_concurrent_cycles,
        receiver,
        sender.downgrade(),
    );
    tokio::spawn(actor.run());
    SchedulerHandle::new(sender)
}
