pub mod service;
pub mod sweep;

pub use service::{
    DlqService, DlqStats, InsertOutcome, NewDeadLetter, RequeueMark, dlq_service,
};
pub use sweep::{SweepReport, run_promotion_sweep, sweep_once};
