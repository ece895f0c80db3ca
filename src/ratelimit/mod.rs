//! Token bucket rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod decision;
mod key;
mod limiter;
mod sweeper;

pub use backend::RateLimiterBackend;
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::Decision;
pub use key::PrincipalKey;
pub use limiter::TokenBucketLimiter;
pub use sweeper::Sweeper;
