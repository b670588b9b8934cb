// Agora Fabric - Per-subscriber bounded queue
//
// Each subscriber owns one bounded queue. On overflow the lowest-priority
// queued event goes first (oldest among equals); priority-5 traffic is
// never dropped and may push the queue past its bound.

use std::collections::{HashSet, VecDeque};

use agora_core::{EventRecord, EventType, EMERGENCY_PRIORITY};

/// What happened to an event offered to a full queue
#[derive(Debug)]
pub enum PushOutcome {
    /// Enqueued without displacing anything
    Enqueued,
    /// Enqueued after evicting a lower-priority event
    Displaced(EventRecord),
    /// The incoming event itself was the lowest priority and was dropped
    Rejected(EventRecord),
}

/// One subscriber's delivery queue
#[derive(Debug)]
pub struct SubscriberQueue {
    buf: VecDeque<EventRecord>,
    capacity: usize,

    /// Event types the subscriber asked for; `None` means all
    filter: Option<HashSet<EventType>>,

    /// Highest sequence ever enqueued, used to resync after a lagged
    /// commit feed
    last_enqueued: u64,

    /// Lifetime count of dropped events
    dropped: u64,
}

impl SubscriberQueue {
    pub fn new(capacity: usize, filter: Option<HashSet<EventType>>) -> Self {
        Self {
            buf: VecDeque::new(),
            capacity,
            filter,
            last_enqueued: 0,
            dropped: 0,
        }
    }

    /// Whether the subscription covers this event type
    pub fn wants(&self, event_type: EventType) -> bool {
        match &self.filter {
            Some(types) => types.contains(&event_type),
            None => true,
        }
    }

    /// Offer one event, applying the overflow policy
    pub fn push(&mut self, event: EventRecord) -> PushOutcome {
        if event.sequence > self.last_enqueued {
            self.last_enqueued = event.sequence;
        }

        if self.buf.len() < self.capacity || event.priority == EMERGENCY_PRIORITY {
            self.buf.push_back(event);
            return PushOutcome::Enqueued;
        }

        // Full: evict the lowest-priority queued event (oldest among
        // equals) unless the incoming event ranks below everything.
        let victim_idx = self
            .buf
            .iter()
            .enumerate()
            .filter(|(_, e)| e.priority < EMERGENCY_PRIORITY)
            .min_by_key(|(idx, e)| (e.priority, *idx))
            .map(|(idx, _)| idx);

        match victim_idx {
            Some(idx) if self.buf[idx].priority <= event.priority => {
                let victim = self.buf.remove(idx).expect("index from enumerate");
                self.buf.push_back(event);
                self.dropped += 1;
                PushOutcome::Displaced(victim)
            }
            _ => {
                self.dropped += 1;
                PushOutcome::Rejected(event)
            }
        }
    }

    /// Take up to `max` events in delivery order
    pub fn drain(&mut self, max: usize) -> Vec<EventRecord> {
        let take = max.min(self.buf.len());
        self.buf.drain(..take).collect()
    }

    /// Remove every event below emergency priority; used when an
    /// emergency halt flushes the fabric
    pub fn flush_non_emergency(&mut self) -> usize {
        let before = self.buf.len();
        self.buf.retain(|e| e.priority == EMERGENCY_PRIORITY);
        before - self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last_enqueued(&self) -> u64 {
        self.last_enqueued
    }

    pub fn set_last_enqueued(&mut self, sequence: u64) {
        self.last_enqueued = sequence;
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
