use thiserror::Error;

#[derive(Error, Debug)]
pub enum TankError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Linear algebra error: {0}")]
    LinAlg(String),

    #[error("QP solver error: {0}")]
    Solver(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TankResult<T> = Result<T, TankError>;
