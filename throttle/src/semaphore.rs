use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("limiter was closed while waiting for {0} permit(s)")]
    Closed(u32),
}

/// Weighted counting limiter with a fixed capacity.
#[derive(Debug, Clone)]
pub struct Limiter {
    sem: Arc<tokio::sync::Semaphore>,
    capacity: u32,
}

/// Capacity held by one holder; released on drop.
#[derive(Debug)]
pub struct Permit {
    _inner: tokio::sync::OwnedSemaphorePermit,
    weight: u32,
}

impl Permit {
    pub fn weight(&self) -> usize {
        self.weight as usize
    }
}

impl Limiter {
    /// Creates a limiter; a capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, u32::MAX as usize) as u32;
        Self {
            sem: Arc::new(tokio::sync::Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Weight actually charged for a request: never 0, never above capacity.
    pub fn clamp(&self, weight: usize) -> u32 {
        weight.clamp(1, self.capacity as usize) as u32
    }

    pub async fn acquire(&self, weight: usize) -> Result<Permit, Error> {
        let weight = self.clamp(weight);
        let inner = self
            .sem
            .clone()
            .acquire_many_owned(weight)
            .await
            .map_err(|_| Error::Closed(weight))?;
        tracing::trace!(
            "acquired {} permit(s), {} left",
            weight,
            self.sem.available_permits()
        );
        Ok(Permit {
            _inner: inner,
            weight,
        })
    }

    /// Wakes all waiters with [`Error::Closed`].
    pub fn close(&self) {
        self.sem.close();
    }
}
