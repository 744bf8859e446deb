//! Subscription registry.
//!
//! Maps client-scoped subscription ids to their state. Mutated from caller
//! threads (subscribe/unsubscribe/acknowledge) and from the dispatch path
//! (confirmations and deliveries), so every access goes through one mutex.
//! Listener callbacks are never invoked with the lock held: accessors hand
//! out a clone of the listener `Arc` instead.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::listener::SubscriptionListener;
use crate::models::{AckMode, SubscriptionInfo};

/// Current time in millis since Unix epoch.
#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// State of one subscription.
pub(crate) struct SubEntry {
    matcher: Option<String>,
    durable: Option<String>,
    ack_mode: AckMode,
    last_seq: u64,
    pending: bool,
    listener: Arc<dyn SubscriptionListener>,
    created_at_ms: u64,
    last_event_time_ms: Option<u64>,
}

/// What to send to (re-)issue a SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubscribeRequest {
    pub id: u64,
    pub matcher: Option<String>,
    pub durable: Option<String>,
    pub ack_mode: AckMode,
    pub last_seq: u64,
}

/// Outcome of offering a delivery to the registry.
pub(crate) enum Delivery {
    /// Deliver to this listener.
    Accept {
        listener: Arc<dyn SubscriptionListener>,
        ack_mode: AckMode,
    },
    /// Already seen (sequence number at or below last seen).
    Duplicate { last_seq: u64, ack_mode: AckMode },
    /// No such subscription.
    Unknown,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subs: Mutex<BTreeMap<u64, SubEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription in the pending state.
    pub fn insert(
        &self,
        id: u64,
        matcher: Option<String>,
        durable: Option<String>,
        ack_mode: AckMode,
        from_seq: u64,
        listener: Arc<dyn SubscriptionListener>,
    ) -> SubscribeRequest {
        let request = SubscribeRequest {
            id,
            matcher: matcher.clone(),
            durable: durable.clone(),
            ack_mode,
            last_seq: from_seq,
        };
        self.subs.lock().insert(
            id,
            SubEntry {
                matcher,
                durable,
                ack_mode,
                last_seq: from_seq,
                pending: true,
                listener,
                created_at_ms: now_ms(),
                last_event_time_ms: None,
            },
        );
        request
    }

    pub fn remove(&self, id: u64) -> Option<Arc<dyn SubscriptionListener>> {
        self.subs.lock().remove(&id).map(|e| e.listener)
    }

    pub fn ack_mode(&self, id: u64) -> Option<AckMode> {
        self.subs.lock().get(&id).map(|e| e.ack_mode)
    }

    /// SUBSCRIBED: clear the pending flag.
    pub fn confirm(&self, id: u64) -> Option<Arc<dyn SubscriptionListener>> {
        let mut subs = self.subs.lock();
        let entry = subs.get_mut(&id)?;
        entry.pending = false;
        Some(entry.listener.clone())
    }

    /// Retryable subscribe failure: re-issue on the next welcome.
    pub fn mark_pending(&self, id: u64) -> Option<Arc<dyn SubscriptionListener>> {
        let mut subs = self.subs.lock();
        let entry = subs.get_mut(&id)?;
        entry.pending = true;
        Some(entry.listener.clone())
    }

    /// Mark every subscription pending and return the SUBSCRIBE requests to
    /// re-issue, ordered by id. Unless the session was resumed, every
    /// last-seen counter is reset to zero first.
    pub fn prepare_resubscribe(&self, resumed: bool) -> Vec<SubscribeRequest> {
        let mut subs = self.subs.lock();
        subs.iter_mut()
            .map(|(id, entry)| {
                if !resumed {
                    entry.last_seq = 0;
                }
                entry.pending = true;
                SubscribeRequest {
                    id: *id,
                    matcher: entry.matcher.clone(),
                    durable: entry.durable.clone(),
                    ack_mode: entry.ack_mode,
                    last_seq: entry.last_seq,
                }
            })
            .collect()
    }

    /// Offer an inbound delivery. Deliveries without a sequence number are
    /// always accepted.
    pub fn offer(&self, id: u64, seq: Option<u64>) -> Delivery {
        let mut subs = self.subs.lock();
        let Some(entry) = subs.get_mut(&id) else {
            return Delivery::Unknown;
        };
        if let Some(seq) = seq {
            if seq <= entry.last_seq {
                return Delivery::Duplicate {
                    last_seq: entry.last_seq,
                    ack_mode: entry.ack_mode,
                };
            }
        }
        entry.last_event_time_ms = Some(now_ms());
        Delivery::Accept {
            listener: entry.listener.clone(),
            ack_mode: entry.ack_mode,
        }
    }

    /// Record `seq` as acknowledged. Never moves backwards.
    pub fn advance(&self, id: u64, seq: u64) -> bool {
        match self.subs.lock().get_mut(&id) {
            Some(entry) => {
                entry.last_seq = entry.last_seq.max(seq);
                true
            },
            None => false,
        }
    }

    #[cfg(test)]
    pub fn last_seq(&self, id: u64) -> Option<u64> {
        self.subs.lock().get(&id).map(|e| e.last_seq)
    }

    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        self.subs
            .lock()
            .iter()
            .map(|(id, entry)| SubscriptionInfo {
                id: *id,
                matcher: entry.matcher.clone(),
                durable: entry.durable.clone(),
                ack_mode: entry.ack_mode,
                last_seq: entry.last_seq,
                pending: entry.pending,
                last_event_time_ms: entry.last_event_time_ms,
                created_at_ms: entry.created_at_ms,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    struct Noop;

    impl SubscriptionListener for Noop {
        fn on_messages(&self, _subscription_id: u64, _messages: &[Message]) {}
    }

    fn registry_with(id: u64, ack_mode: AckMode) -> SubscriptionRegistry {
        let registry = SubscriptionRegistry::new();
        registry.insert(id, Some("acct > 10".into()), None, ack_mode, 0, Arc::new(Noop));
        registry
    }

    #[test]
    fn test_insert_starts_pending() {
        let registry = registry_with(1, AckMode::Auto);
        let info = registry.snapshot();
        assert_eq!(info.len(), 1);
        assert!(info[0].pending);
        assert_eq!(info[0].last_seq, 0);

        assert!(registry.confirm(1).is_some());
        assert!(!registry.snapshot()[0].pending);
        assert!(registry.confirm(99).is_none());
    }

    #[test]
    fn test_offer_filters_duplicates() {
        let registry = registry_with(1, AckMode::Auto);

        assert!(matches!(registry.offer(1, Some(5)), Delivery::Accept { .. }));
        registry.advance(1, 5);
        assert!(matches!(registry.offer(1, Some(5)), Delivery::Duplicate { last_seq: 5, .. }));
        assert!(matches!(registry.offer(1, Some(4)), Delivery::Duplicate { .. }));
        assert!(matches!(registry.offer(1, Some(6)), Delivery::Accept { .. }));
        assert!(matches!(registry.offer(1, None), Delivery::Accept { .. }));
        assert!(matches!(registry.offer(2, Some(1)), Delivery::Unknown));
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let registry = registry_with(1, AckMode::Client);
        registry.advance(1, 9);
        registry.advance(1, 3);
        assert_eq!(registry.last_seq(1), Some(9));
        assert!(!registry.advance(42, 1));
    }

    #[test]
    fn test_prepare_resubscribe_resets_unless_resumed() {
        let registry = registry_with(1, AckMode::Auto);
        registry.insert(2, None, Some("durable-2".into()), AckMode::Client, 0, Arc::new(Noop));
        registry.advance(1, 10);
        registry.advance(2, 20);
        registry.confirm(1);
        registry.confirm(2);

        let resumed = registry.prepare_resubscribe(true);
        assert_eq!(resumed.iter().map(|r| r.last_seq).collect::<Vec<_>>(), vec![10, 20]);
        assert!(registry.snapshot().iter().all(|s| s.pending));

        let fresh = registry.prepare_resubscribe(false);
        assert_eq!(fresh.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(fresh.iter().all(|r| r.last_seq == 0));
        assert!(registry.snapshot().iter().all(|s| s.last_seq == 0));
    }

    #[test]
    fn test_from_seq_seeds_last_seen() {
        let registry = SubscriptionRegistry::new();
        let request = registry.insert(3, None, None, AckMode::Auto, 50, Arc::new(Noop));
        assert_eq!(request.last_seq, 50);
        assert!(matches!(registry.offer(3, Some(50)), Delivery::Duplicate { .. }));
    }
}
