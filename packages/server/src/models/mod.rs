pub mod dlq;
pub mod shared;
