pub mod cache;

pub use cache::{CacheEntry, CacheKey, Lifetime, ResponseCache};
