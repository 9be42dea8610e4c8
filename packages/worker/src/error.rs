use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue error: {0}")]
    Queue(#[from] mq::MqError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
