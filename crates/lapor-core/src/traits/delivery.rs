//! Delivery seam between the delayed queue and whatever actually sends.

use async_trait::async_trait;

use crate::types::DeliveryResult;

/// Sends one message to the fixed recipient channel.
///
/// Implementations never return an error: every failure is folded into
/// [`DeliveryResult::Failed`] so the queue can reschedule it.
#[async_trait]
pub trait Deliver: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, content: &str) -> DeliveryResult;
}
