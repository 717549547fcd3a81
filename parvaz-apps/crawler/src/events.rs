//!  Parvaz Flight Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Crawl Event Bus
//!
//! Typed progress events, delivered at-least-once to every subscriber.
//! Each subscriber owns a bounded buffer; when it falls behind, the oldest
//! droppable event (`SiteProgress`, `FlightsFound`) is evicted first, and
//! publishers only ever block when a buffer is full of critical events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::ErrorKind;
use crate::scheduler::CrawlStatus;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    JobStarted {
        origin: String,
        destination: String,
        sites: Vec<String>,
    },
    SiteStarted {
        site_id: String,
    },
    SiteProgress {
        site_id: String,
        attempt: u32,
        reason: String,
    },
    SiteCompleted {
        site_id: String,
        count: usize,
        latency_ms: u64,
        bytes: u64,
    },
    SiteFailed {
        site_id: String,
        kind: ErrorKind,
        message: String,
    },
    FlightsFound {
        site_id: String,
        delta: usize,
    },
    JobCompleted {
        status: CrawlStatus,
        total_flights: usize,
        sites_succeeded: usize,
        sites_failed: usize,
    },
}

impl CrawlEvent {
    /// Whether the bus may shed this event under back-pressure.
    pub fn droppable(&self) -> bool {
        matches!(
            self,
            CrawlEvent::SiteProgress { .. } | CrawlEvent::FlightsFound { .. }
        )
    }
}

/// Delivered wrapper: subscribers dedup on `message_id` since delivery is
/// at-least-once.
#[derive(Clone, Debug, Serialize)]
pub struct EventEnvelope {
    pub message_id: u64,
    pub job_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: CrawlEvent,
}

struct SubscriberQueue {
    buffer: StdMutex<VecDeque<EventEnvelope>>,
    depth: usize,
    items: tokio::sync::Notify,
    space: tokio::sync::Notify,
    closed: StdMutex<bool>,
}

impl SubscriberQueue {
    fn new(depth: usize) -> Self {
        Self {
            buffer: StdMutex::new(VecDeque::with_capacity(depth)),
            depth,
            items: tokio::sync::Notify::new(),
            space: tokio::sync::Notify::new(),
            closed: StdMutex::new(false),
        }
    }

    /// Push one envelope, evicting the oldest droppable entry when full.
    /// Returns false when the queue is full of critical events; the caller
    /// must wait for space.
    fn try_push(&self, envelope: &EventEnvelope, dropped: &AtomicU64) -> bool {
        let mut buffer = self.buffer.lock().expect("event buffer poisoned");
        if buffer.len() >= self.depth {
            match buffer.iter().position(|queued| queued.event.droppable()) {
                Some(idx) => {
                    // Shed the oldest non-critical entry to make room.
                    buffer.remove(idx);
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                None if envelope.event.droppable() => {
                    // Full of critical events; the newcomer is sheddable.
                    dropped.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                None => return false,
            }
        }
        buffer.push_back(envelope.clone());
        drop(buffer);
        self.items.notify_one();
        true
    }

    fn pop(&self) -> Option<EventEnvelope> {
        let mut buffer = self.buffer.lock().expect("event buffer poisoned");
        let envelope = buffer.pop_front();
        drop(buffer);
        if envelope.is_some() {
            self.space.notify_one();
        }
        envelope
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().expect("event closed flag poisoned")
    }
}

/// Receiving half handed to a subscriber.
pub struct EventStream {
    queue: Arc<SubscriberQueue>,
}

impl EventStream {
    /// Next event, or `None` once the bus side is gone and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            if let Some(envelope) = self.queue.pop() {
                return Some(envelope);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.items.notified().await;
        }
    }

    /// Drain whatever is buffered right now without waiting.
    pub fn drain_ready(&mut self) -> Vec<EventEnvelope> {
        let mut drained = Vec::new();
        while let Some(envelope) = self.queue.pop() {
            drained.push(envelope);
        }
        drained
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        *self.queue.closed.lock().expect("event closed flag poisoned") = true;
        // Unblock a publisher waiting on this subscriber.
        self.queue.space.notify_one();
    }
}

pub struct EventBus {
    subscribers: StdMutex<Vec<Arc<SubscriberQueue>>>,
    seq: AtomicU64,
    dropped: AtomicU64,
    depth: usize,
}

impl EventBus {
    pub fn new(depth: usize) -> Self {
        Self {
            subscribers: StdMutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            depth,
        }
    }

    pub fn subscribe(&self) -> EventStream {
        let queue = Arc::new(SubscriberQueue::new(self.depth));
        self.subscribers
            .lock()
            .expect("event subscribers poisoned")
            .push(Arc::clone(&queue));
        EventStream { queue }
    }

    /// Total droppable events shed so far, across all subscribers.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publish to every live subscriber. Critical events apply back-pressure
    /// when a subscriber's buffer holds only critical events; droppable ones
    /// never block.
    pub async fn publish(&self, job_id: &str, event: CrawlEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            message_id: self.seq.fetch_add(1, Ordering::Relaxed),
            job_id: job_id.to_string(),
            at: Utc::now(),
            event,
        };

        let queues: Vec<Arc<SubscriberQueue>> = {
            let mut subscribers = self
                .subscribers
                .lock()
                .expect("event subscribers poisoned");
            subscribers.retain(|queue| !queue.is_closed());
            subscribers.clone()
        };

        for queue in queues {
            while !queue.try_push(&envelope, &self.dropped) {
                if queue.is_closed() {
                    break;
                }
                queue.space.notified().await;
            }
        }
        envelope
    }

    /// Non-blocking publish for droppable events only; they are shed rather
    /// than ever applying back-pressure, so this is safe from sync code.
    pub fn publish_now(&self, job_id: &str, event: CrawlEvent) {
        debug_assert!(event.droppable());
        let envelope = EventEnvelope {
            message_id: self.seq.fetch_add(1, Ordering::Relaxed),
            job_id: job_id.to_string(),
            at: Utc::now(),
            event,
        };
        let queues: Vec<Arc<SubscriberQueue>> = self
            .subscribers
            .lock()
            .expect("event subscribers poisoned")
            .clone();
        for queue in queues {
            if !queue.is_closed() {
                queue.try_push(&envelope, &self.dropped);
            }
        }
    }
}
