//! Delayed queue: decouples "something changed" from "a message was sent".
//!
//! The whole queue lives under one store key as a JSON snapshot and is
//! rewritten on every mutation while the gate is held. The store has no
//! per-element operations, so this read-modify-write is what keeps the
//! producer and the drainer from losing each other's updates.
//!
//! Invariant: key absent ⇔ queue empty. An empty snapshot is never stored.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lapor_core::config::QueueConfig;
use lapor_core::error::{ErrorKind, LaporError, Result};
use lapor_core::traits::{Deliver, PropertyStore};
use lapor_core::types::{DeliveryResult, PendingMessage, UpdateKind};
use serde::Serialize;
use uuid::Uuid;

use crate::dedup::DedupCache;
use crate::gate::{Gate, GateGuard};
use crate::marker;

pub const PENDING_MESSAGES_KEY: &str = "pending_messages";

/// Counters for one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Gate was busy; nothing was looked at.
    pub skipped: bool,
    pub sent: usize,
    /// Dropped as duplicates of the last sent message.
    pub suppressed: usize,
    pub rescheduled: usize,
    /// Not yet due.
    pub waiting: usize,
    /// Gave up after `max_attempts`.
    pub dropped: usize,
    pub errors: usize,
}

/// Outcome of one send attempt.
enum Attempt {
    Sent(DedupCache),
    Failed(ErrorKind),
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Nothing was sent, suppressed, rescheduled or dropped.
    pub fn is_idle(&self) -> bool {
        self.sent == 0 && self.suppressed == 0 && self.rescheduled == 0 && self.dropped == 0
    }
}

/// Durable delayed queue with single-slot dedup.
pub struct DelayedQueue {
    store: Arc<dyn PropertyStore>,
    gate: Gate,
    config: QueueConfig,
}

impl DelayedQueue {
    pub fn new(store: Arc<dyn PropertyStore>, gate: Gate, config: QueueConfig) -> Self {
        Self {
            store,
            gate,
            config,
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn store(&self) -> &dyn PropertyStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn lock(&self, op: &str) -> Result<GateGuard> {
        self.gate.acquire().await.ok_or_else(|| {
            LaporError::GateBusy(format!("{op}: another execution is in progress"))
        })
    }

    fn load(&self, _gate: &GateGuard) -> Result<Vec<PendingMessage>> {
        self.snapshot()
    }

    fn snapshot(&self) -> Result<Vec<PendingMessage>> {
        match self.store.get(PENDING_MESSAGES_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, _gate: &GateGuard, messages: &[PendingMessage]) -> Result<()> {
        if messages.is_empty() {
            self.store.delete(PENDING_MESSAGES_KEY)
        } else {
            let json = serde_json::to_string(messages)?;
            self.store.set(PENDING_MESSAGES_KEY, &json)
        }
    }

    /// Queue `content` for sending after `delay`. Takes the gate itself.
    pub async fn enqueue(
        &self,
        content: &str,
        target_row: Option<u32>,
        update_kind: UpdateKind,
        delay: Duration,
    ) -> Result<PendingMessage> {
        let guard = self.lock("enqueue").await?;
        self.enqueue_with(&guard, Utc::now(), content, target_row, update_kind, delay)
    }

    /// Enqueue for callers that already hold the gate.
    pub fn enqueue_with(
        &self,
        gate: &GateGuard,
        now: DateTime<Utc>,
        content: &str,
        target_row: Option<u32>,
        update_kind: UpdateKind,
        delay: Duration,
    ) -> Result<PendingMessage> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| LaporError::Config(format!("Delay out of range: {e}")))?;
        let message = PendingMessage::new(content, target_row, update_kind, now + delay, now);

        let mut messages = self.load(gate)?;
        messages.push(message.clone());
        self.save(gate, &messages)?;

        tracing::info!(
            "📥 Queued {} message{} for {} ({} pending)",
            update_kind,
            target_row.map(|r| format!(" for row {r}")).unwrap_or_default(),
            message.scheduled_send_time.format("%H:%M:%S"),
            messages.len()
        );
        Ok(message)
    }

    /// Current snapshot, in queue order.
    pub fn pending(&self) -> Result<Vec<PendingMessage>> {
        self.snapshot()
    }

    /// Operator-level discard of one queued message.
    pub async fn discard(&self, id: Uuid) -> Result<bool> {
        let guard = self.lock("discard").await?;
        let mut messages = self.load(&guard)?;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        if messages.len() == before {
            return Ok(false);
        }
        self.save(&guard, &messages)?;
        tracing::info!("🗑️ Discarded queued message {id}");
        Ok(true)
    }

    /// Drop every pending message and forget the dedup cache.
    pub async fn clear(&self) -> Result<usize> {
        let guard = self.lock("clear").await?;
        let count = self.load(&guard).map(|m| m.len()).unwrap_or(0);
        self.store.delete(PENDING_MESSAGES_KEY)?;
        DedupCache::clear(&guard, self.store.as_ref())?;
        tracing::info!("🧹 Queue cleared ({count} messages) and dedup cache reset");
        Ok(count)
    }

    /// Send every due message once.
    ///
    /// A busy gate is not an error: the cycle is skipped and the next tick
    /// retries. One message's failure never aborts the rest of the cycle.
    ///
    /// Once the session reports it is closed or not ready, the remaining due messages
    /// are rescheduled without another readiness wait, so the gate is held
    /// for at most one wait per cycle.
    pub async fn drain(&self, now: DateTime<Utc>, deliver: &dyn Deliver) -> Result<DrainReport> {
        let Some(guard) = self.gate.acquire().await else {
            tracing::info!(
                "🔒 Could not obtain lock within {}s for processing pending messages",
                self.gate.wait().as_secs()
            );
            return Ok(DrainReport::skipped());
        };

        let messages = self.load(&guard)?;
        if messages.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut report = DrainReport::default();
        let mut cache = DedupCache::load(self.store.as_ref())?;
        let mut remaining = Vec::with_capacity(messages.len());
        let mut unavailable: Option<ErrorKind> = None;

        for message in messages {
            if !message.is_due(now) {
                report.waiting += 1;
                remaining.push(message);
                continue;
            }

            if cache.as_ref().is_some_and(|c| {
                c.is_duplicate(&message.content, now, self.config.dedup_cooldown())
            }) {
                tracing::info!("🔁 Suppressed duplicate message {}", message.id);
                report.suppressed += 1;
                continue;
            }

            if let Some(kind) = unavailable {
                tracing::debug!("Session unavailable ({kind:?}), deferring message {}", message.id);
                if let Some(kept) = self.reschedule(message, now, &mut report) {
                    remaining.push(kept);
                }
                continue;
            }

            match self.deliver_one(&guard, &message, now, deliver).await {
                Ok(Attempt::Sent(updated)) => {
                    cache = Some(updated);
                    report.sent += 1;
                }
                Ok(Attempt::Failed(kind)) => {
                    if matches!(
                        kind,
                        ErrorKind::NotReady | ErrorKind::RestartExhausted | ErrorKind::SessionClosed
                    ) {
                        unavailable = Some(kind);
                    }
                    if let Some(kept) = self.reschedule(message, now, &mut report) {
                        remaining.push(kept);
                    }
                }
                Err(e) => {
                    tracing::error!("❌ Error processing message {}: {e}", message.id);
                    report.errors += 1;
                    if let Some(kept) = self.reschedule(message, now, &mut report) {
                        remaining.push(kept);
                    }
                }
            }
        }

        self.save(&guard, &remaining)?;
        Ok(report)
    }

    /// Attempt one send. `Err` only for bookkeeping failures after a send.
    async fn deliver_one(
        &self,
        gate: &GateGuard,
        message: &PendingMessage,
        now: DateTime<Utc>,
        deliver: &dyn Deliver,
    ) -> Result<Attempt> {
        tracing::debug!("📤 Sending message {} via {}", message.id, deliver.name());
        match deliver.deliver(&message.content).await {
            DeliveryResult::Sent { message_id } => {
                if message.update_kind == UpdateKind::New
                    && let Some(row) = message.target_row
                {
                    marker::advance(gate, self.store.as_ref(), row)?;
                }
                let cache = DedupCache::record(gate, self.store.as_ref(), &message.content, now)?;
                tracing::info!("✅ Message {} delivered ({message_id})", message.id);
                Ok(Attempt::Sent(cache))
            }
            DeliveryResult::Failed {
                kind,
                retryable,
                reason,
            } => {
                tracing::warn!(
                    "⚠️ Delivery of {} failed ({:?}, retryable={retryable}): {reason}",
                    message.id,
                    kind
                );
                Ok(Attempt::Failed(kind))
            }
        }
    }

    /// Push a failed message into the future, or drop it past `max_attempts`.
    fn reschedule(
        &self,
        mut message: PendingMessage,
        now: DateTime<Utc>,
        report: &mut DrainReport,
    ) -> Option<PendingMessage> {
        message.attempt_count += 1;
        if self.config.max_attempts > 0 && message.attempt_count >= self.config.max_attempts {
            tracing::error!(
                "❌ Giving up on message {} after {} attempts",
                message.id,
                message.attempt_count
            );
            report.dropped += 1;
            return None;
        }

        let retry = chrono::Duration::from_std(self.config.retry_delay())
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let floor = message.scheduled_send_time + chrono::Duration::milliseconds(1);
        message.scheduled_send_time = (now + retry).max(floor);
        report.rescheduled += 1;
        tracing::info!(
            "⏳ Message {} rescheduled to {} (attempt {})",
            message.id,
            message.scheduled_send_time.format("%H:%M:%S"),
            message.attempt_count
        );
        Some(message)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dedup;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use lapor_core::error::ErrorKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every delivery; fails with `failure` while it is set.
    #[derive(Default)]
    pub(crate) struct RecordingDeliver {
        pub sent: Mutex<Vec<String>>,
        pub failure: Mutex<Option<ErrorKind>>,
        pub calls: AtomicUsize,
    }

    impl RecordingDeliver {
        pub fn failing() -> Self {
            Self::failing_with(ErrorKind::SessionClosed)
        }

        pub fn failing_with(kind: ErrorKind) -> Self {
            let d = Self::default();
            *d.failure.lock().unwrap() = Some(kind);
            d
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Deliver for RecordingDeliver {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, content: &str) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(kind) = *self.failure.lock().unwrap() {
                return DeliveryResult::failed(kind, true, format!("{kind:?}"));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(content.to_string());
            DeliveryResult::Sent {
                message_id: format!("msg-{}", sent.len()),
            }
        }
    }

    fn queue() -> (DelayedQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = DelayedQueue::new(
            store.clone(),
            Gate::new(Duration::from_secs(1)),
            QueueConfig::default(),
        );
        (queue, store)
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    async fn enqueue_at(
        q: &DelayedQueue,
        now: DateTime<Utc>,
        content: &str,
        row: Option<u32>,
        kind: UpdateKind,
        delay_secs: u64,
    ) -> PendingMessage {
        let guard = q.gate().acquire().await.unwrap();
        q.enqueue_with(&guard, now, content, row, kind, Duration::from_secs(delay_secs))
            .unwrap()
    }

    #[tokio::test]
    async fn test_not_due_is_kept_unchanged() {
        let (q, _) = queue();
        let t0 = Utc::now();
        let msg = enqueue_at(&q, t0, "hello", Some(3), UpdateKind::New, 30).await;
        let deliver = RecordingDeliver::default();

        let report = q.drain(t0 + secs(10), &deliver).await.unwrap();
        assert_eq!(report.waiting, 1);
        assert!(deliver.sent().is_empty());
        assert_eq!(q.pending().unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn test_saldo_scenario_send_then_suppress() {
        let (q, store) = queue();
        let t0 = Utc::now();
        let deliver = RecordingDeliver::default();

        enqueue_at(&q, t0, "Saldo: Rp100.000", Some(5), UpdateKind::New, 30).await;
        let report = q.drain(t0 + secs(30), &deliver).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(marker::load(store.as_ref()).unwrap(), Some(5));
        let cache = DedupCache::load(store.as_ref()).unwrap().unwrap();
        assert_eq!(cache.last_content, "Saldo: Rp100.000");
        assert_eq!(cache.last_sent_at.timestamp_millis(), (t0 + secs(30)).timestamp_millis());
        assert_eq!(store.get(PENDING_MESSAGES_KEY).unwrap(), None);

        enqueue_at(&q, t0 + secs(35), "Saldo: Rp100.000", Some(6), UpdateKind::New, 0).await;
        let report = q.drain(t0 + secs(35), &deliver).await.unwrap();
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(deliver.sent().len(), 1);
        // Suppression touches neither the cache nor the marker.
        assert_eq!(marker::load(store.as_ref()).unwrap(), Some(5));
        assert_eq!(DedupCache::load(store.as_ref()).unwrap().unwrap(), cache);
        assert!(q.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_reschedules_five_minutes_out() {
        let (q, store) = queue();
        let t0 = Utc::now();
        let before = enqueue_at(&q, t0, "hello", Some(4), UpdateKind::New, 0).await;
        let deliver = RecordingDeliver::failing();

        let report = q.drain(t0, &deliver).await.unwrap();
        assert_eq!(report.rescheduled, 1);

        let pending = q.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt_count, 1);
        assert_eq!(pending[0].scheduled_send_time, t0 + secs(300));
        assert!(pending[0].scheduled_send_time > before.scheduled_send_time);
        assert_eq!(marker::load(store.as_ref()).unwrap(), None);
        assert_eq!(DedupCache::load(store.as_ref()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unready_session_defers_rest_of_cycle() {
        let (q, _) = queue();
        let t0 = Utc::now();
        for content in ["a", "b", "c", "d", "e"] {
            enqueue_at(&q, t0, content, None, UpdateKind::Other, 0).await;
        }
        let deliver = RecordingDeliver::failing_with(ErrorKind::NotReady);

        let report = q.drain(t0, &deliver).await.unwrap();
        assert_eq!(deliver.calls(), 1);
        assert_eq!(report.rescheduled, 5);
        let pending = q.pending().unwrap();
        assert!(pending.iter().all(|m| m.attempt_count == 1));
        assert!(pending.iter().all(|m| m.scheduled_send_time == t0 + secs(300)));
    }

    #[tokio::test]
    async fn test_other_failures_still_try_every_message() {
        let (q, _) = queue();
        let t0 = Utc::now();
        enqueue_at(&q, t0, "a", None, UpdateKind::Other, 0).await;
        enqueue_at(&q, t0, "b", None, UpdateKind::Other, 0).await;
        let deliver = RecordingDeliver::failing_with(ErrorKind::TransientSendFailure);

        let report = q.drain(t0, &deliver).await.unwrap();
        assert_eq!(deliver.calls(), 2);
        assert_eq!(report.rescheduled, 2);
    }

    #[tokio::test]
    async fn test_retry_time_strictly_increases_even_with_zero_delay() {
        let store = Arc::new(MemoryStore::new());
        let config = QueueConfig {
            retry_delay_secs: 0,
            ..QueueConfig::default()
        };
        let q = DelayedQueue::new(store, Gate::new(Duration::from_secs(1)), config);
        let t0 = Utc::now();
        let deliver = RecordingDeliver::failing();
        enqueue_at(&q, t0, "x", None, UpdateKind::Other, 0).await;

        let mut last = t0;
        for _ in 0..3 {
            let now = q.pending().unwrap()[0].scheduled_send_time;
            q.drain(now, &deliver).await.unwrap();
            let next = q.pending().unwrap()[0].scheduled_send_time;
            assert!(next > last);
            last = next;
        }
    }

    #[tokio::test]
    async fn test_marker_only_advances_on_new() {
        let (q, store) = queue();
        let t0 = Utc::now();
        let deliver = RecordingDeliver::default();
        enqueue_at(&q, t0, "row 9", Some(9), UpdateKind::New, 0).await;
        enqueue_at(&q, t0, "row 4 edited", Some(4), UpdateKind::Update, 0).await;
        enqueue_at(&q, t0, "row 7 late", Some(7), UpdateKind::New, 0).await;
        enqueue_at(&q, t0, "oops", None, UpdateKind::Error, 0).await;

        let report = q.drain(t0, &deliver).await.unwrap();
        assert_eq!(report.sent, 4);
        assert_eq!(marker::load(store.as_ref()).unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_duplicates_within_one_cycle_are_suppressed() {
        let (q, _) = queue();
        let t0 = Utc::now();
        let deliver = RecordingDeliver::default();
        enqueue_at(&q, t0, "same", None, UpdateKind::Other, 0).await;
        enqueue_at(&q, t0, "same", None, UpdateKind::Other, 0).await;

        let report = q.drain(t0, &deliver).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.suppressed, 1);
    }

    #[tokio::test]
    async fn test_drain_twice_is_idempotent() {
        let (q, store) = queue();
        let t0 = Utc::now();
        let deliver = RecordingDeliver::default();
        enqueue_at(&q, t0, "a", Some(3), UpdateKind::New, 0).await;
        enqueue_at(&q, t0, "b", None, UpdateKind::Other, 120).await;

        q.drain(t0, &deliver).await.unwrap();
        let snapshot = store.get(PENDING_MESSAGES_KEY).unwrap();
        let second = q.drain(t0, &deliver).await.unwrap();

        assert!(second.is_idle());
        assert_eq!(deliver.sent(), vec!["a".to_string()]);
        assert_eq!(store.get(PENDING_MESSAGES_KEY).unwrap(), snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_gate_skips_cycle() {
        let (q, _) = queue();
        let t0 = Utc::now();
        enqueue_at(&q, t0, "a", None, UpdateKind::Other, 0).await;
        let deliver = RecordingDeliver::default();

        let _held = q.gate().acquire().await.unwrap();
        let report = q.drain(t0, &deliver).await.unwrap();
        assert!(report.skipped);
        assert!(deliver.sent().is_empty());
        assert!(matches!(
            q.enqueue("b", None, UpdateKind::Other, Duration::ZERO).await,
            Err(LaporError::GateBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_max_attempts_drops_message() {
        let store = Arc::new(MemoryStore::new());
        let config = QueueConfig {
            max_attempts: 2,
            ..QueueConfig::default()
        };
        let q = DelayedQueue::new(store.clone(), Gate::new(Duration::from_secs(1)), config);
        let t0 = Utc::now();
        let deliver = RecordingDeliver::failing();
        enqueue_at(&q, t0, "x", None, UpdateKind::Other, 0).await;

        q.drain(t0, &deliver).await.unwrap();
        let report = q.drain(t0 + secs(300), &deliver).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(store.get(PENDING_MESSAGES_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_dedup_cache_is_ignored() {
        let (q, store) = queue();
        let t0 = Utc::now();
        let deliver = RecordingDeliver::default();
        enqueue_at(&q, t0, "ok", None, UpdateKind::Other, 0).await;
        store.set(dedup::MESSAGE_TIMESTAMP_KEY, "not-a-number").unwrap();
        store.set(dedup::MESSAGE_CACHE_KEY, "ok").unwrap();

        let report = q.drain(t0, &deliver).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn test_discard_and_clear() {
        let (q, store) = queue();
        let t0 = Utc::now();
        let a = enqueue_at(&q, t0, "a", None, UpdateKind::Other, 60).await;
        enqueue_at(&q, t0, "b", None, UpdateKind::Other, 60).await;

        assert!(q.discard(a.id).await.unwrap());
        assert!(!q.discard(a.id).await.unwrap());
        assert_eq!(q.pending().unwrap().len(), 1);

        assert_eq!(q.clear().await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
