pub mod cache;
pub mod key;
pub mod ratelimit;

pub use cache::TtlCache;
pub use key::{cache_key, canonical_json, Scope};
pub use ratelimit::{Decision, RateLimiter};
