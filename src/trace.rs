//! Fire-and-forget scheduling trace events
//!
//! The scheduling hot path reports discrete events to a bounded in-process
//! bus. Emission never blocks and never fails the scheduling path: when the
//! buffer is full the event is dropped. Consumers drain the bus at their own
//! pace; each event is also mirrored to the `log` facade at trace level.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use once_cell::sync::Lazy;

use crate::routine::RoutineId;

/// Default capacity of the process-wide event bus
const BUS_CAPACITY: usize = 8192;

/// A discrete scheduling event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedEvent {
    /// A routine was admitted into a processor's ready structure
    RoutineCreated {
        /// The admitted routine
        routine: RoutineId,
        /// The owning processor
        processor: usize,
    },
    /// A routine was selected for execution
    RoutineDispatched {
        /// The dispatched routine
        routine: RoutineId,
        /// The dispatching processor
        processor: usize,
    },
}

/// Bounded, non-blocking event bus
pub struct EventBus {
    sender: Sender<SchedEvent>,
    receiver: Receiver<SchedEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Publish an event. Drops the event when the buffer is full.
    pub fn emit(&self, event: SchedEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                log::trace!("trace bus full, dropping {:?}", dropped);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Drain all currently buffered events
    pub fn drain(&self) -> Vec<SchedEvent> {
        self.receiver.try_iter().collect()
    }

    /// Number of currently buffered events
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check whether the bus is currently empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }
}

/// Process-wide default bus
static GLOBAL_BUS: Lazy<EventBus> = Lazy::new(EventBus::default);

/// Get the process-wide event bus
pub fn bus() -> &'static EventBus {
    &GLOBAL_BUS
}

/// Publish an event on the process-wide bus
pub fn emit(event: SchedEvent) {
    match event {
        SchedEvent::RoutineCreated { routine, processor } => {
            log::trace!("routine {} created on processor {}", routine.as_u64(), processor);
        }
        SchedEvent::RoutineDispatched { routine, processor } => {
            log::trace!("routine {} dispatched on processor {}", routine.as_u64(), processor);
        }
    }
    GLOBAL_BUS.emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_drain() {
        let bus = EventBus::with_capacity(4);
        let id = RoutineId::new();

        bus.emit(SchedEvent::RoutineCreated { routine: id, processor: 0 });
        bus.emit(SchedEvent::RoutineDispatched { routine: id, processor: 0 });

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SchedEvent::RoutineCreated { routine: id, processor: 0 });
        assert!(bus.is_empty());
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let bus = EventBus::with_capacity(1);
        let id = RoutineId::new();

        bus.emit(SchedEvent::RoutineCreated { routine: id, processor: 0 });
        // Buffer is full; this must return immediately without blocking
        bus.emit(SchedEvent::RoutineCreated { routine: id, processor: 1 });

        assert_eq!(bus.len(), 1);
        assert_eq!(
            bus.drain(),
            vec![SchedEvent::RoutineCreated { routine: id, processor: 0 }]
        );
    }
}
