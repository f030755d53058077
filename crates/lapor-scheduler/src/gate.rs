//! Mutual-exclusion gate. Serializes every read-modify-write against the store.
//!
//! Acquisition is bounded: a caller that cannot get the gate in time skips
//! its work for this cycle instead of piling up behind the holder.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-wide advisory lock with bounded wait. Cheap to clone.
#[derive(Clone)]
pub struct Gate {
    lock: Arc<Mutex<()>>,
    wait: Duration,
}

/// Proof of holding the gate. Released on drop, including on early return.
pub struct GateGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Gate {
    pub fn new(wait: Duration) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            wait,
        }
    }

    /// Try to take the gate within the configured wait.
    pub async fn acquire(&self) -> Option<GateGuard> {
        match tokio::time::timeout(self.wait, self.lock.clone().lock_owned()).await {
            Ok(guard) => Some(GateGuard { _guard: guard }),
            Err(_) => {
                tracing::debug!("🔒 Gate busy after {:?}", self.wait);
                None
            }
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = Gate::new(Duration::from_millis(50));
        let guard = gate.acquire().await;
        assert!(guard.is_some());
        drop(guard);
        assert!(gate.acquire().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_when_held() {
        let gate = Gate::new(Duration::from_secs(10));
        let _held = gate.acquire().await.unwrap();
        let other = gate.clone();
        let started = tokio::time::Instant::now();
        assert!(other.acquire().await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
