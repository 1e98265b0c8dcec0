//! Detection feed adapters

mod memory;

pub use memory::InMemoryDetectionFeed;
