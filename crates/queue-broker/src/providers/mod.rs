//! Queue provider implementations.

pub mod memory;
pub mod nats;

pub use memory::InMemoryProvider;
pub use nats::NatsProvider;
