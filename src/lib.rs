pub mod alias;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod filter;
pub mod format;
pub mod pipeline;
pub mod schema;

pub use config::EngineConfig;
pub use engine::{ResourceSummary, TabularEngine};
pub use error::{EngineError, EngineResult};
pub use exec::ExecutionResult;
pub use pipeline::{AggKind, OperationSpec};
