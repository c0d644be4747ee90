// Accumulation detection and alert engine for tracked tokens.

pub mod config;
pub mod storage;
pub mod detection;
pub mod subscriptions;
pub mod alerts;
pub mod scheduler;

// Re-export commonly used types for convenience
pub use config::Config;
pub use detection::Engine;
pub use storage::Storage;
