//! Persistence: the hot in-process cache, the batching writer and the repositories it flushes
//! through.

pub mod batch;
pub mod cache;
pub mod repository;

pub use batch::{BatchWriter, QueueItem};
pub use cache::{CacheEntry, HotCache};
pub use repository::{PgRepository, Repository, TokenFilter, TokenStatistics, TraderVolume};
