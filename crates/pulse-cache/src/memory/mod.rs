//! In-process cache provider.

pub mod pattern;
pub mod pubsub;
pub mod store;

pub use pubsub::PubSubRegistry;
pub use store::MemoryCacheProvider;
