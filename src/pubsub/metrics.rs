use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Счётчики брокера.
///
/// Обновляются без блокировок; снимок не обязан быть согласованным
/// между полями.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
    buffered: AtomicU64,
    evicted: AtomicU64,
    replayed: AtomicU64,
    dropped: AtomicU64,
    subscribed: AtomicU64,
    unsubscribed: AtomicU64,
    rejected: AtomicU64,
}

/// Снимок метрик (ответ на команду `STATS`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub buffered: u64,
    pub evicted: u64,
    pub replayed: u64,
    pub dropped: u64,
    pub subscribed: u64,
    pub unsubscribed: u64,
    pub rejected: u64,
    pub active_topics: u64,
    pub active_subscribers: u64,
}

impl BrokerMetrics {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(
        &self,
        count: usize,
    ) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffered(&self) {
        self.buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(
        &self,
        count: usize,
    ) {
        self.replayed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscribed(&self) {
        self.subscribed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsubscribed(&self) {
        self.unsubscribed.fetch_add(1, Ordering::Relaxed);
    }

    /// Операция отклонена из-за остановки брокера.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        active_topics: usize,
        active_subscribers: usize,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribed: self.subscribed.load(Ordering::Relaxed),
            unsubscribed: self.unsubscribed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            active_topics: active_topics as u64,
            active_subscribers: active_subscribers as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = BrokerMetrics::default();
        m.record_published();
        m.record_published();
        m.record_delivered(3);
        m.record_delivery_failure();
        m.record_replayed(2);

        let snap = m.snapshot(1, 4);
        assert_eq!(snap.published, 2);
        assert_eq!(snap.delivered, 3);
        assert_eq!(snap.delivery_failures, 1);
        assert_eq!(snap.replayed, 2);
        assert_eq!(snap.active_topics, 1);
        assert_eq!(snap.active_subscribers, 4);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let snap = BrokerMetrics::default().snapshot(0, 0);
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["published"], 0);
        assert!(json.get("active_subscribers").is_some());
    }
}
