pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod telemetry;
pub mod traits;

// Re-export common types for convenience
pub use config::{ConfigError, HarvestConfig, StallPolicy};
pub use executor::DetailExecutor;
pub use model::*;
pub use traits::*;
