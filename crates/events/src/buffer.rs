//! Pending-event buffering for state-stored aggregates.

/// Ordered list of domain events an aggregate has produced but nobody has
/// staged yet.
///
/// The aggregate only ever appends; the orchestrating handler takes the whole
/// list exactly once, after the state change has been persisted and every
/// event staged. This keeps the aggregate agnostic of delivery mechanics.
#[derive(Debug, Clone)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> EventBuffer<E> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append one event. Only the owning aggregate calls this.
    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    /// Events recorded so far, oldest first.
    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hand the buffered events to the orchestrating caller, clearing the
    /// buffer.
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_in_order_and_clears() {
        let mut buffer = EventBuffer::new();
        buffer.record("first");
        buffer.record("second");
        assert_eq!(buffer.len(), 2);

        let taken = buffer.take();
        assert_eq!(taken, vec!["first", "second"]);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }
}
