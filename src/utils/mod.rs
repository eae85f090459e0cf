//! Utility modules for configuration, resilience and logging

pub mod env;
pub mod logging;
pub mod retry;
pub mod time;

// Re-export commonly used items
pub use env::{env_bool, env_int, env_opt, env_or_default, env_path};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use retry::{
    retry_if_retryable, retry_when, IsRetryable, RetryConfig, RetryError,
};
pub use time::{current_timestamp, current_timestamp_duration};
