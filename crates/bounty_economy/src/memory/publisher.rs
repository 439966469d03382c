//! Event recorder.

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::events::EconomyEvent;
use crate::ports::PublisherSink;

/// In-memory [`PublisherSink`] that keeps every published event.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<EconomyEvent>>,
    fail_next: Mutex<bool>,
}

impl MemoryPublisher {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<EconomyEvent> {
        self.events.lock().clone()
    }

    /// Fails the next publish.
    pub fn fail_next_publish(&self) {
        *self.fail_next.lock() = true;
    }
}

impl PublisherSink for MemoryPublisher {
    fn publish(&self, ctx: &Context, events: &[EconomyEvent]) -> EconomyResult<()> {
        ctx.check()?;
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(EconomyError::internal("publisher unavailable"));
        }
        self.events.lock().extend_from_slice(events);
        Ok(())
    }
}
