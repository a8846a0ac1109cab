//! Bounded building blocks shared by every cache and queue in this crate
//! all size/memory capped, none lock-free, all safe for concurrent
//! use from the single component that owns them.

pub mod bounded_queue;
pub mod bounded_set;
pub mod circular_buffer;
pub mod lru_cache;

pub use bounded_queue::{BoundedQueue, PushOutcome};
pub use bounded_set::BoundedSet;
pub use circular_buffer::CircularBuffer;
pub use lru_cache::{GetOutcome, TtlLruCache};
