pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("profile has no stages")]
    InvalidStages,

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid base url: `{0}`")]
    InvalidBaseUrl(String),
}
