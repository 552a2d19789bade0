pub mod rate_limit;
pub mod retry;

pub use rate_limit::RateLimitedClient;
pub use retry::RetryingClient;
