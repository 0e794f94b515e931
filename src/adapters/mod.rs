pub mod governor_rate_limit;
pub mod unavailable_backend;

/// Re-export commonly used types from adapters
pub use governor_rate_limit::GovernorRateLimitBackend;
pub use unavailable_backend::UnavailableBackendClient;
