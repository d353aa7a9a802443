//! Priority scheduling.
//!
//! Events are parked in one of four bounded lanes (critical, high, normal,
//! low) together with their continuation, and a background task drains them.
//! The drain always takes the oldest entry of the most urgent non-empty lane,
//! so a queued critical event runs before any queued high event, and so on.
//!
//! The chain returns [`Outcome::Queued`] as soon as an event is parked; the
//! handler runs later on the drain task. Handler errors at that point can
//! only be logged.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{DropReason, Middleware, Next, Outcome};
use crate::catalog::EventPriority;
use crate::error::HandlerError;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityQueueConfig {
    /// Capacity of each lane.
    pub capacity: usize,
    /// Longest the drain task sleeps when every lane is empty.
    pub idle_interval: Duration,
}

impl Default for PriorityQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            idle_interval: Duration::from_millis(10),
        }
    }
}

type Entry = (Event, Next);

struct Lanes {
    // Indexed most urgent first.
    queues: [Mutex<VecDeque<Entry>>; 4],
    wakeup: Notify,
    running: AtomicBool,
}

fn lane_index(priority: EventPriority) -> usize {
    match priority {
        EventPriority::Critical => 0,
        EventPriority::High => 1,
        EventPriority::Normal => 2,
        EventPriority::Low => 3,
    }
}

impl Lanes {
    fn pop(&self) -> Option<Entry> {
        self.queues.iter().find_map(|queue| queue.lock().pop_front())
    }
}

/// Defers delivery to a background task ordered by event priority.
pub struct PriorityQueueMiddleware {
    config: PriorityQueueConfig,
    lanes: Arc<Lanes>,
    drain: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl PriorityQueueMiddleware {
    pub fn new(config: PriorityQueueConfig) -> Self {
        Self {
            config,
            lanes: Arc::new(Lanes {
                queues: Default::default(),
                wakeup: Notify::new(),
                running: AtomicBool::new(false),
            }),
            drain: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Spawn the drain task. Must be called from within a Tokio runtime.
    /// Starting twice is a no-op.
    pub fn start(&self) {
        if self.lanes.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let lanes = Arc::clone(&self.lanes);
        let idle = self.config.idle_interval;
        let handle = tokio::spawn(async move {
            info!("Priority queue drain started");
            while lanes.running.load(Ordering::SeqCst) {
                match lanes.pop() {
                    Some((event, next)) => {
                        let event_type = event.event_type().to_string();
                        if let Err(err) = next.run(event).await {
                            error!(event_type = %event_type, error = %err, "Error processing queued event");
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = lanes.wakeup.notified() => {}
                            _ = tokio::time::sleep(idle) => {}
                        }
                    }
                }
            }
            info!("Priority queue drain stopped");
        });
        *self.drain.lock() = Some(handle);
    }

    /// Stop the drain task after the event it is currently running, if any.
    /// Queued events stay queued until the next `start`.
    pub async fn stop(&self) {
        self.lanes.running.store(false, Ordering::SeqCst);
        self.lanes.wakeup.notify_one();

        let handle = self.drain.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Priority queue drain ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lanes.running.load(Ordering::SeqCst)
    }

    /// Events waiting across all lanes.
    pub fn pending(&self) -> usize {
        self.lanes.queues.iter().map(|q| q.lock().len()).sum()
    }

    pub fn pending_at(&self, priority: EventPriority) -> usize {
        self.lanes.queues[lane_index(priority)].lock().len()
    }

    /// Events dropped because their lane was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PriorityQueueMiddleware {
    fn default() -> Self {
        Self::new(PriorityQueueConfig::default())
    }
}

impl Drop for PriorityQueueMiddleware {
    fn drop(&mut self) {
        self.lanes.running.store(false, Ordering::SeqCst);
        self.lanes.wakeup.notify_one();
    }
}

#[async_trait]
impl Middleware for PriorityQueueMiddleware {
    fn name(&self) -> &'static str {
        "priority_queue"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        let priority = event.priority();
        {
            let mut queue = self.lanes.queues[lane_index(priority)].lock();
            if queue.len() >= self.config.capacity {
                drop(queue);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                DropReason::QueueFull.record();
                warn!(
                    priority = priority.as_str(),
                    event_type = event.event_type(),
                    capacity = self.config.capacity,
                    "Priority queue full, dropping event"
                );
                return Ok(Outcome::Dropped(DropReason::QueueFull));
            }
            queue.push_back((event, next));
        }

        debug!(priority = priority.as_str(), "Event queued");
        self.lanes.wakeup.notify_one();
        Ok(Outcome::Queued)
    }
}
