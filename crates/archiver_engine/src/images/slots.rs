use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("no conversion slot within {0:?}")]
    Timeout(Duration),
    #[error("cancelled while waiting for a conversion slot")]
    Cancelled,
    #[error("conversion slots closed")]
    Closed,
}

/// Process-wide conversion permits. Clones share the same pool, so one
/// instance is handed to every concurrent run.
#[derive(Debug, Clone)]
pub struct ConversionSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConversionSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a permit until `wait` elapses or `cancel` fires. The permit
    /// is released when dropped.
    pub async fn acquire(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, SlotError> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SlotError::Cancelled),
            acquired = tokio::time::timeout(wait, semaphore.acquire_owned()) => match acquired {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(SlotError::Closed),
                Err(_) => Err(SlotError::Timeout(wait)),
            },
        }
    }
}
