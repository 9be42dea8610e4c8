pub mod failure_watcher;

pub use failure_watcher::{FailureWatcher, PromotionOutcome, WatcherError};
