use thiserror::Error;

#[derive(Debug, Error)]
pub enum BssError {
    #[error("invalid sampling rate: {0}")]
    InvalidSampleRate(u32),

    #[error("inconsistent recordings: {0}")]
    Inconsistent(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BssError>;
