use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Mirror error: {0}")]
    Mirror(#[from] hls_mirror_engine::MirrorError),
}

pub type Result<T> = std::result::Result<T, AppError>;
