pub mod dlq;
pub mod metrics;
