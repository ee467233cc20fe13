pub mod layout;
mod memory;
mod redis_cache;

pub use memory::MemoryCacheManager;
pub use redis_cache::RedisCacheManager;
