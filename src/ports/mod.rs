pub mod backend_client;
pub mod rate_limit_backend;
