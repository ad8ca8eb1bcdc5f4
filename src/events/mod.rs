pub mod records;
pub mod store;

pub use records::*;
pub use store::{EventStore, JsonlEventStore};
#[cfg(test)]
pub use store::MemoryEventStore;
