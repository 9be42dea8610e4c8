pub mod database;
pub mod entity;
pub mod error;
pub mod queue;
pub mod store;

pub use entity::job::Model as Job;
pub use error::MqError;
pub use queue::{FailDecision, JobCounts, JobQueue};
