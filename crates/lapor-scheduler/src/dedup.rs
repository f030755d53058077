//! Single-slot dedup cache: the last content sent and when.
//!
//! Only the most recent message is remembered. Identical content inside the
//! cooldown window is treated as already delivered.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lapor_core::error::Result;
use lapor_core::traits::PropertyStore;

use crate::gate::GateGuard;

pub const MESSAGE_CACHE_KEY: &str = "last_message_cache";
pub const MESSAGE_TIMESTAMP_KEY: &str = "last_message_timestamp";

/// Snapshot of the last confirmed send.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupCache {
    pub last_content: String,
    pub last_sent_at: DateTime<Utc>,
}

impl DedupCache {
    /// Load the cache; `None` if either half is missing or unreadable.
    pub fn load(store: &dyn PropertyStore) -> Result<Option<Self>> {
        let content = store.get(MESSAGE_CACHE_KEY)?;
        let stamp = store.get(MESSAGE_TIMESTAMP_KEY)?;
        let (Some(last_content), Some(stamp)) = (content, stamp) else {
            return Ok(None);
        };
        let Some(last_sent_at) = stamp
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        else {
            tracing::warn!("⚠️ Ignoring unreadable dedup timestamp: {stamp}");
            return Ok(None);
        };
        Ok(Some(Self {
            last_content,
            last_sent_at,
        }))
    }

    /// True if `content` repeats the cached message within `cooldown` of `now`.
    pub fn is_duplicate(&self, content: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if content != self.last_content {
            return false;
        }
        let elapsed = now.signed_duration_since(self.last_sent_at);
        match chrono::Duration::from_std(cooldown) {
            Ok(window) => elapsed < window,
            Err(_) => true,
        }
    }

    /// Record a confirmed send. Call only after the transport acknowledged it.
    pub fn record(
        _gate: &GateGuard,
        store: &dyn PropertyStore,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        store.set(MESSAGE_CACHE_KEY, content)?;
        store.set(MESSAGE_TIMESTAMP_KEY, &now.timestamp_millis().to_string())?;
        Ok(Self {
            last_content: content.to_string(),
            last_sent_at: now,
        })
    }

    /// Forget the cached message.
    pub fn clear(_gate: &GateGuard, store: &dyn PropertyStore) -> Result<()> {
        store.delete(MESSAGE_CACHE_KEY)?;
        store.delete(MESSAGE_TIMESTAMP_KEY)?;
        Ok(())
    }
}

/// Convenience check against whatever the store currently holds.
pub fn is_duplicate(
    store: &dyn PropertyStore,
    content: &str,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<bool> {
    Ok(DedupCache::load(store)?
        .map(|cache| cache.is_duplicate(content, now, cooldown))
        .unwrap_or(false))
}
