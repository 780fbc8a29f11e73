//! `campus-events`: enrollment lifecycle events and their in-process distribution.
//!
//! Events are published after a write has been persisted. The bus is for
//! distribution only; the enrollment store remains the source of truth.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
