//! Concurrency gate for heavy classification work.
//!
//! Decoding large images, scanning PDFs, and rendering movie frames all run
//! behind a counting semaphore so a bulk import cannot decode hundreds of
//! payloads at once. The slot is held by a [`GatePass`] and released when it
//! drops, including on early return, error, or cancellation.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{IngestError, IngestResult};

pub const DEFAULT_GATE_CAPACITY: usize = 12;

#[derive(Debug, Clone)]
pub struct IngestGate {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePass {
    _permit: OwnedSemaphorePermit,
}

impl IngestGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot. Fails only once the gate has been closed.
    pub async fn acquire(&self) -> IngestResult<GatePass> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::Cancelled)?;
        Ok(GatePass { _permit: permit })
    }

    /// Refuse new passes; waiting acquirers fail with `Cancelled`.
    pub fn close(&self) {
        self.slots.close();
    }
}

impl Default for IngestGate {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn pass_releases_on_drop() {
        let gate = IngestGate::new(2);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn closed_gate_refuses_passes() {
        let gate = IngestGate::new(1);
        gate.close();
        assert!(gate.acquire().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        assert_eq!(IngestGate::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_capacity() {
        let gate = IngestGate::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            let running = running.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _pass = gate.acquire().await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
    }
}
