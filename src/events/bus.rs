//! Subscription rooms with bounded, non-blocking delivery.
//!
//! Each subscriber owns a bounded buffer of pending events. Publishing
//! never blocks: when a buffer is full the oldest non-terminal event is
//! dropped and the next delivered event carries an `events_lost` flag
//! so clients know to re-fetch progress over HTTP. Terminal events are
//! never dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;
use tracing::debug;

use super::messages::ProgressEvent;
use crate::batch::JobId;

pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 256;

struct SubscriptionShared {
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    events_lost: AtomicBool,
    capacity: usize,
}

impl SubscriptionShared {
    fn deliver(&self, event: ProgressEvent) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(|e| !e.is_terminal()) {
                queue.remove(pos);
                self.events_lost.store(true, Ordering::Relaxed);
            } else if !event.is_terminal() {
                // Nothing droppable and the incoming event is not
                // terminal: the incoming event itself is the casualty.
                self.events_lost.store(true, Ordering::Relaxed);
                self.notify.notify_one();
                return;
            }
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }
}

/// A live subscription to one job's events.
pub struct Subscription {
    job_id: JobId,
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Receive the next event in publication order. The boolean flags
    /// whether events were lost since the previous delivery.
    pub async fn recv(&self) -> (ProgressEvent, bool) {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock().unwrap();
                if let Some(event) = queue.pop_front() {
                    let lost = self.shared.events_lost.swap(false, Ordering::Relaxed);
                    return (event, lost);
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant used by tests and slow-drain paths.
    pub fn try_recv(&self) -> Option<(ProgressEvent, bool)> {
        let mut queue = self.shared.queue.lock().unwrap();
        let event = queue.pop_front()?;
        let lost = self.shared.events_lost.swap(false, Ordering::Relaxed);
        Some((event, lost))
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }
}

/// Pub/sub hub keyed by job id.
pub struct ProgressBus {
    rooms: Mutex<HashMap<JobId, Vec<Weak<SubscriptionShared>>>>,
    buffer_capacity: usize,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_BUFFER)
    }
}

impl ProgressBus {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            buffer_capacity: buffer_capacity.max(2),
        }
    }

    /// Register a subscriber for `job_id`. Dropping the returned
    /// subscription detaches it; dead subscribers are pruned on the
    /// next publish.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let shared = Arc::new(SubscriptionShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            events_lost: AtomicBool::new(false),
            capacity: self.buffer_capacity,
        });
        self.rooms
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push(Arc::downgrade(&shared));
        Subscription {
            job_id: job_id.to_string(),
            shared,
        }
    }

    /// Deliver an event to every live subscriber of the job's room.
    /// Never blocks on a slow consumer.
    pub fn publish(&self, event: &ProgressEvent) {
        let job_id = event.queue_id().to_string();
        let subscribers: Vec<Arc<SubscriptionShared>> = {
            let mut rooms = self.rooms.lock().unwrap();
            let Some(room) = rooms.get_mut(&job_id) else {
                return;
            };
            room.retain(|weak| weak.strong_count() > 0);
            if room.is_empty() {
                rooms.remove(&job_id);
                return;
            }
            room.iter().filter_map(Weak::upgrade).collect()
        };

        for subscriber in subscribers {
            subscriber.deliver(event.clone());
        }
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        let rooms = self.rooms.lock().unwrap();
        rooms
            .get(job_id)
            .map(|room| room.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Drop rooms whose job no longer exists or whose subscribers are
    /// all gone. Returns the number of rooms removed.
    pub fn prune_rooms(&self, live_jobs: &HashSet<JobId>) -> usize {
        let mut rooms = self.rooms.lock().unwrap();
        let before = rooms.len();
        rooms.retain(|job_id, room| {
            room.retain(|weak| weak.strong_count() > 0);
            !room.is_empty() && live_jobs.contains(job_id)
        });
        let removed = before - rooms.len();
        if removed > 0 {
            debug!("Pruned {} stale subscription rooms", removed);
        }
        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }
}
