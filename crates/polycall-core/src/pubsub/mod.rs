//! Subscription / Pub-Sub Layer (C7, spec §4.7): topic store, wildcard
//! matcher, fan-out delivery and subscription lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{CoreError, ErrorKind, PolyResult};

pub type SubscriberCallback = Box<dyn Fn(&str, &[u8]) -> PolyResult<()> + Send + Sync>;

struct Subscriber {
    id: u32,
    callback: SubscriberCallback,
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<Subscriber>,
}

/// Configuration read at construction (spec §6: `max_subscriptions`,
/// `max_subscribers_per_topic`, `enable_wildcards`, `case_sensitive`).
#[derive(Debug, Clone, Copy)]
pub struct PubSubLimits {
    pub max_subscriptions: usize,
    pub max_subscribers_per_topic: usize,
    pub enable_wildcards: bool,
    pub case_sensitive: bool,
}

impl Default for PubSubLimits {
    fn default() -> Self {
        Self {
            max_subscriptions: 10_000,
            max_subscribers_per_topic: 1_000,
            enable_wildcards: true,
            case_sensitive: true,
        }
    }
}

/// The topic store: one lock held for read during publish fan-out
/// (spec §5 "C7 uses one lock per subscription context").
pub struct PubSub {
    topics: RwLock<HashMap<String, Topic>>,
    next_id: AtomicU32,
    total_subscriptions: AtomicU32,
    delivery_failures: AtomicU64,
    limits: PubSubLimits,
}

impl PubSub {
    pub fn new(limits: PubSubLimits) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            total_subscriptions: AtomicU32::new(0),
            delivery_failures: AtomicU64::new(0),
            limits,
        }
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    /// Create a topic if absent and append a subscriber to it, respecting
    /// `max_subscriptions`/`max_subscribers_per_topic` (spec §4.7).
    /// Returns a monotonic, non-zero subscription id.
    pub fn subscribe(&self, topic: &str, callback: SubscriberCallback) -> PolyResult<u32> {
        if self.total_subscriptions.load(Ordering::SeqCst) as usize >= self.limits.max_subscriptions {
            return Err(CoreError::capacity_exceeded("max_subscriptions reached"));
        }
        let mut topics = self.topics.write();
        let entry = topics.entry(topic.to_string()).or_default();
        if entry.subscribers.len() >= self.limits.max_subscribers_per_topic {
            return Err(CoreError::capacity_exceeded("max_subscribers_per_topic reached"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entry.subscribers.push(Subscriber { id, callback });
        self.total_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    /// Linear find-and-remove by id, shifting the remainder. Removes the
    /// topic entirely once it reaches zero subscribers (spec §4.7).
    pub fn unsubscribe(&self, id: u32) -> PolyResult<()> {
        if id == 0 {
            return Err(CoreError::invalid_parameter("0 is not a valid subscription id"));
        }
        let mut topics = self.topics.write();
        let mut found_topic = None;
        for (name, topic) in topics.iter_mut() {
            if let Some(pos) = topic.subscribers.iter().position(|s| s.id == id) {
                topic.subscribers.remove(pos);
                found_topic = Some(name.clone());
                break;
            }
        }
        match found_topic {
            Some(name) => {
                if topics.get(&name).map(|t| t.subscribers.is_empty()).unwrap_or(false) {
                    topics.remove(&name);
                }
                self.total_subscriptions.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(CoreError::not_found(format!("subscription {id} does not exist"))),
        }
    }

    /// Notify direct subscribers of `topic` in insertion order, then —
    /// when wildcards are enabled — every other topic whose pattern
    /// matches. Best-effort: callback failures increment
    /// `delivery_failures` without halting fan-out (spec §4.7, property
    /// 7, scenario S7).
    pub fn publish(&self, topic: &str, data: &[u8]) -> usize {
        let topics = self.topics.read();
        let mut delivered = 0usize;
        if let Some(exact) = topics.get(topic) {
            delivered += self.deliver(exact, topic, data);
        }
        if self.limits.enable_wildcards {
            for (pattern, entry) in topics.iter() {
                if pattern == topic {
                    continue;
                }
                if topic_matches(pattern, topic, self.limits.case_sensitive) {
                    delivered += self.deliver(entry, topic, data);
                }
            }
        }
        delivered
    }

    fn deliver(&self, topic: &Topic, published_topic: &str, data: &[u8]) -> usize {
        let mut delivered = 0;
        for subscriber in &topic.subscribers {
            match (subscriber.callback)(published_topic, data) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(subscriber_id = subscriber.id, %err, "subscriber delivery failed");
                    self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        delivered
    }
}

/// Wildcard grammar (Open Question resolved, SPEC_FULL §10): segments
/// separated by `/`; `*` matches exactly one segment; `**` matches zero
/// or more segments.
fn topic_matches(pattern: &str, topic: &str, case_sensitive: bool) -> bool {
    let (pattern, topic) = if case_sensitive {
        (pattern.to_string(), topic.to_string())
    } else {
        (pattern.to_lowercase(), topic.to_lowercase())
    };
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();
    match_segments(&pattern_segments, &topic_segments)
}

fn match_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=topic.len()).any(|i| match_segments(&pattern[1..], &topic[i..]))
        }
        Some(&"*") => !topic.is_empty() && match_segments(&pattern[1..], &topic[1..]),
        Some(seg) => topic.first() == Some(seg) && match_segments(&pattern[1..], &topic[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_callback() -> (Arc<AtomicUsize>, SubscriberCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let cb: SubscriberCallback = Box::new(move |_topic, _data| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, cb)
    }

    #[test]
    fn exact_match_without_wildcards_scenario_property_7() {
        let pubsub = PubSub::new(PubSubLimits { enable_wildcards: false, ..Default::default() });
        let (count_a, cb_a) = counting_callback();
        let (count_b, cb_b) = counting_callback();
        pubsub.subscribe("sensors/temp", cb_a).unwrap();
        pubsub.subscribe("sensors/*", cb_b).unwrap();
        pubsub.publish("sensors/temp", b"22");
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wildcard_publish_scenario_s7() {
        let pubsub = PubSub::new(PubSubLimits::default());
        let (count_exact, cb_exact) = counting_callback();
        let (count_wild, cb_wild) = counting_callback();
        pubsub.subscribe("sensors/temp", cb_exact).unwrap();
        pubsub.subscribe("sensors/*", cb_wild).unwrap();
        let delivered = pubsub.publish("sensors/temp", b"22");
        assert_eq!(delivered, 2);
        assert_eq!(count_exact.load(Ordering::SeqCst), 1);
        assert_eq!(count_wild.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn double_star_matches_any_depth() {
        assert!(topic_matches("sensors/**", "sensors/a/b/c", true));
        assert!(topic_matches("sensors/**", "sensors", true));
        assert!(!topic_matches("sensors/*", "sensors/a/b", true));
    }

    #[test]
    fn unsubscribe_empties_and_removes_topic() {
        let pubsub = PubSub::new(PubSubLimits::default());
        let (_count, cb) = counting_callback();
        let id = pubsub.subscribe("sensors/temp", cb).unwrap();
        pubsub.unsubscribe(id).unwrap();
        assert_eq!(pubsub.topics.read().len(), 0);
    }

    #[test]
    fn subscriber_ceiling_is_enforced() {
        let pubsub = PubSub::new(PubSubLimits { max_subscribers_per_topic: 1, ..Default::default() });
        let (_c1, cb1) = counting_callback();
        let (_c2, cb2) = counting_callback();
        pubsub.subscribe("t", cb1).unwrap();
        let err = pubsub.subscribe("t", cb2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    }

    #[test]
    fn failed_delivery_increments_counter_without_stopping_fanout() {
        let pubsub = PubSub::new(PubSubLimits::default());
        let (count_ok, cb_ok) = counting_callback();
        let failing: SubscriberCallback = Box::new(|_t, _d| Err(CoreError::internal("boom")));
        pubsub.subscribe("t", failing).unwrap();
        pubsub.subscribe("t", cb_ok).unwrap();
        let delivered = pubsub.publish("t", b"x");
        assert_eq!(delivered, 1);
        assert_eq!(count_ok.load(Ordering::SeqCst), 1);
        assert_eq!(pubsub.delivery_failures(), 1);
    }
}
