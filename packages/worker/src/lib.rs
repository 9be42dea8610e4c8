pub mod config;
pub mod error;
pub mod pool;

pub use config::{WorkerAppConfig, WorkerConfig};
pub use error::{Result, WorkerError};
pub use pool::{JobHandler, WorkerPool};
