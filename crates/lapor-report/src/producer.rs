//! Ledger producer: turns sheet edits into queued notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lapor_core::config::ReportConfig;
use lapor_core::error::{LaporError, Result};
use lapor_core::types::{PendingMessage, UpdateKind};
use lapor_scheduler::{DelayedQueue, GateGuard, dedup, marker};
use serde::Serialize;
use uuid::Uuid;

use crate::format::{TEST_MESSAGE, error_message, financial_message, summary_message};
use crate::row::{EditEvent, LedgerRow};

/// What happened to one edit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EditOutcome {
    /// Another execution held the gate; the edit was not looked at.
    Busy,
    Ignored { reason: String },
    Incomplete,
    Queued { id: Uuid, kind: UpdateKind },
    /// Building the notification failed; an error notice was queued instead.
    ErrorQueued { id: Uuid, error: String },
    /// Building the notification failed and the same notice went out recently.
    ErrorSuppressed { error: String },
}

pub struct ReportProducer {
    queue: Arc<DelayedQueue>,
    config: ReportConfig,
}

impl ReportProducer {
    pub fn new(queue: Arc<DelayedQueue>, config: ReportConfig) -> Self {
        Self { queue, config }
    }

    /// Handle one sheet edit at the current time.
    pub async fn on_edit(&self, event: &EditEvent) -> Result<EditOutcome> {
        self.on_edit_at(event, Utc::now()).await
    }

    pub async fn on_edit_at(&self, event: &EditEvent, now: DateTime<Utc>) -> Result<EditOutcome> {
        let Some(guard) = self.queue.gate().acquire().await else {
            tracing::info!(
                "🔒 Could not obtain lock within {}s, another execution is in progress",
                self.queue.gate().wait().as_secs()
            );
            return Ok(EditOutcome::Busy);
        };

        if event.sheet != self.config.sheet_name {
            return Ok(ignored(format!("sheet {} is not {}", event.sheet, self.config.sheet_name)));
        }
        if event.row <= self.config.header_rows {
            return Ok(ignored(format!("row {} is a header row", event.row)));
        }
        if event.is_single_cell() && event.column != self.config.trigger_column {
            return Ok(ignored(format!("column {} does not trigger", event.column)));
        }
        if !event.values.is_complete() {
            tracing::debug!("Row {} is incomplete, waiting for more edits", event.row);
            return Ok(EditOutcome::Incomplete);
        }

        match self.queue_row(&guard, event, now) {
            Ok(message) => Ok(EditOutcome::Queued {
                id: message.id,
                kind: message.update_kind,
            }),
            Err(e) => {
                tracing::error!("❌ Error handling edit of row {}: {e}", event.row);
                self.queue_error_notice(&guard, &e, now)
            }
        }
    }

    fn queue_row(
        &self,
        guard: &GateGuard,
        event: &EditEvent,
        now: DateTime<Utc>,
    ) -> Result<PendingMessage> {
        let store = self.queue.store();
        let last_row = marker::load(store)?.unwrap_or(self.config.header_rows);
        let kind = if event.row > last_row {
            UpdateKind::New
        } else {
            UpdateKind::Update
        };

        let content = financial_message(&event.values, kind, self.config.utc_offset_hours)?;
        self.queue.enqueue_with(
            guard,
            now,
            &content,
            Some(event.row),
            kind,
            self.queue.config().message_delay(),
        )
    }

    fn queue_error_notice(
        &self,
        guard: &GateGuard,
        err: &LaporError,
        now: DateTime<Utc>,
    ) -> Result<EditOutcome> {
        let error = err.to_string();
        let notice = error_message(&error);
        let cooldown = self.queue.config().dedup_cooldown();
        if dedup::is_duplicate(self.queue.store(), &notice, now, cooldown)? {
            return Ok(EditOutcome::ErrorSuppressed { error });
        }
        let message = self.queue.enqueue_with(
            guard,
            now,
            &notice,
            None,
            UpdateKind::Error,
            self.queue.config().message_delay(),
        )?;
        Ok(EditOutcome::ErrorQueued {
            id: message.id,
            error,
        })
    }

    /// Queue a balance summary of `rows` for the next drain.
    pub async fn summary(&self, rows: &[LedgerRow]) -> Result<PendingMessage> {
        let content = summary_message(rows);
        self.queue
            .enqueue(&content, None, UpdateKind::Other, std::time::Duration::ZERO)
            .await
    }

    /// Queue the fixed test notification for the next drain.
    pub async fn send_test(&self) -> Result<PendingMessage> {
        self.queue
            .enqueue(TEST_MESSAGE, None, UpdateKind::Other, std::time::Duration::ZERO)
            .await
    }
}

fn ignored(reason: String) -> EditOutcome {
    tracing::debug!("Edit ignored: {reason}");
    EditOutcome::Ignored { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::tests::sample_row;
    use lapor_core::config::QueueConfig;
    use lapor_core::traits::{Deliver, PropertyStore};
    use lapor_core::types::DeliveryResult;
    use lapor_scheduler::{Gate, MemoryStore};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl Deliver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn deliver(&self, content: &str) -> DeliveryResult {
            self.0.lock().unwrap().push(content.to_string());
            DeliveryResult::Sent {
                message_id: "m".into(),
            }
        }
    }

    fn producer() -> (ReportProducer, Arc<DelayedQueue>) {
        let queue = Arc::new(DelayedQueue::new(
            Arc::new(MemoryStore::new()),
            Gate::new(Duration::from_millis(200)),
            QueueConfig::default(),
        ));
        (ReportProducer::new(queue.clone(), ReportConfig::default()), queue)
    }

    fn edit(row: u32, column: u32) -> EditEvent {
        EditEvent {
            sheet: "REKAP".into(),
            row,
            column,
            num_rows: 1,
            num_columns: 1,
            values: sample_row(),
        }
    }

    #[tokio::test]
    async fn test_filters() {
        let (producer, queue) = producer();

        let mut other_sheet = edit(5, 9);
        other_sheet.sheet = "Sheet1".into();
        for event in [other_sheet, edit(2, 9), edit(5, 4)] {
            let outcome = producer.on_edit(&event).await.unwrap();
            assert!(matches!(outcome, EditOutcome::Ignored { .. }));
        }

        let mut incomplete = edit(5, 9);
        incomplete.values.note = None;
        assert_eq!(producer.on_edit(&incomplete).await.unwrap(), EditOutcome::Incomplete);

        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_cell_edit_on_any_column_counts() {
        let (producer, _) = producer();
        let mut paste = edit(5, 1);
        paste.num_columns = 9;
        assert!(matches!(producer.on_edit(&paste).await.unwrap(), EditOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn test_new_then_update_after_delivery() {
        let (producer, queue) = producer();
        let t0 = Utc::now();

        let outcome = producer.on_edit_at(&edit(3, 9), t0).await.unwrap();
        assert!(matches!(outcome, EditOutcome::Queued { kind: UpdateKind::New, .. }));

        let pending = queue.pending().unwrap();
        assert_eq!(pending[0].scheduled_send_time, t0 + chrono::Duration::seconds(30));
        assert!(pending[0].content.starts_with("💰 *LAPORAN BENDAHARA*"));

        let recorder = Recorder::default();
        queue.drain(t0 + chrono::Duration::seconds(31), &recorder).await.unwrap();
        assert_eq!(marker::load(queue.store()).unwrap(), Some(3));

        // Same row edited again is now an update.
        let outcome = producer
            .on_edit_at(&edit(3, 9), t0 + chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert!(matches!(outcome, EditOutcome::Queued { kind: UpdateKind::Update, .. }));
    }

    #[tokio::test]
    async fn test_row_stays_new_until_delivered() {
        let (producer, queue) = producer();
        producer.on_edit(&edit(4, 9)).await.unwrap();
        let outcome = producer.on_edit(&edit(4, 9)).await.unwrap();
        assert!(matches!(outcome, EditOutcome::Queued { kind: UpdateKind::New, .. }));
        assert_eq!(queue.pending().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_row_queues_error_notice_once() {
        let (producer, queue) = producer();
        let mut bad = edit(6, 9);
        bad.values.note = Some("lunas".into());
        let t0 = Utc::now();

        let outcome = producer.on_edit_at(&bad, t0).await.unwrap();
        let EditOutcome::ErrorQueued { error, .. } = outcome else {
            panic!("expected error notice, got {outcome:?}");
        };
        assert!(error.contains("lunas"));

        let pending = queue.pending().unwrap();
        assert_eq!(pending[0].update_kind, UpdateKind::Error);
        assert!(pending[0].content.starts_with("⚠️ *ERROR NOTIFICATION*\n"));

        // Once the notice went out, the same failure inside the cooldown is suppressed.
        let recorder = Recorder::default();
        let sent_at = t0 + chrono::Duration::seconds(30);
        queue.drain(sent_at, &recorder).await.unwrap();
        let outcome = producer
            .on_edit_at(&bad, sent_at + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert!(matches!(outcome, EditOutcome::ErrorSuppressed { .. }));
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_gate() {
        let (producer, queue) = producer();
        let _held = queue.gate().acquire().await.unwrap();
        assert_eq!(producer.on_edit(&edit(5, 9)).await.unwrap(), EditOutcome::Busy);
    }

    #[tokio::test]
    async fn test_summary_and_test_message_are_due_now() {
        let (producer, queue) = producer();
        producer.summary(&[sample_row()]).await.unwrap();
        producer.send_test().await.unwrap();

        let recorder = Recorder::default();
        let report = queue.drain(Utc::now(), &recorder).await.unwrap();
        assert_eq!(report.sent, 2);
        let sent = recorder.0.lock().unwrap();
        assert!(sent[0].starts_with("📊 *RINGKASAN KEUANGAN*"));
        assert_eq!(sent[1], TEST_MESSAGE);
        assert!(queue.store().get("pending_messages").unwrap().is_none());
    }
}
