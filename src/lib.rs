// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod scheduler;
pub mod strategy;

// Re-export commonly used types
pub use error::{ConfigError, GatewayError};
pub use execution::{ExchangeGateway, ExecutionController};
pub use models::*;
pub use scheduler::PollingScheduler;
pub use strategy::SignalSource;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
