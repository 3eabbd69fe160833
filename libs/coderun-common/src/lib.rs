pub mod types;
pub mod language;
pub mod units;
pub mod broker;
pub mod config;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError};
pub use language::{ExecutionProfile, Language, ResolveError};
pub use types::{ExecutionRequest, Job, JobInput, JobOutcome, JobState, TaskSpec};
