pub mod postgres;
pub mod ttl_cache;

pub use postgres::create_pool;
pub use ttl_cache::TtlCache;
