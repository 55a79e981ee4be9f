//! Sliding-window rate limiting and window storage.

mod backend;
mod clock;
mod limiter;
mod limits;
mod store;
mod window;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use limiter::{SlidingWindowLimiter, Verdict};
pub use limits::{LimitConfig, LimitTable, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
pub use store::{InMemoryWindowStore, StoreError, WindowStore};
pub use window::Window;
