use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;

use crate::error::{GuaError, Result};

/// Receives every encoded still, keyed by the session it came from. Called on
/// the engine thread that delivered the packet.
pub trait Consumer: Send + Sync {
    fn on_consume(&self, callee_id: &str, data: Bytes);
}

impl<F> Consumer for F
where
    F: Fn(&str, Bytes) + Send + Sync,
{
    fn on_consume(&self, callee_id: &str, data: Bytes) {
        self(callee_id, data)
    }
}

/// Holds the single consumer. Set once, before the pipeline is activated.
#[derive(Default)]
pub struct ConsumerDispatch {
    consumer: OnceLock<Arc<dyn Consumer>>,
    active: AtomicBool,
    delivered: AtomicU64,
    discarded: AtomicU64,
}

impl ConsumerDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, consumer: Arc<dyn Consumer>) -> Result<()> {
        if self.is_active() {
            return Err(GuaError::PipelineActive);
        }
        self.consumer
            .set(consumer)
            .map_err(|_| GuaError::ConsumerAlreadySet)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.get().is_some()
    }

    /// Returns false when no consumer is set and the payload was dropped.
    pub fn dispatch(&self, callee_id: &str, data: Bytes) -> bool {
        match self.consumer.get() {
            Some(consumer) => {
                consumer.on_consume(callee_id, data);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                log::trace!("no consumer, dropped {} bytes for {}", data.len(), callee_id);
                self.discarded.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}
