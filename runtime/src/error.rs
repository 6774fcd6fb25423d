use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio decode error: {0}")]
    Decode(#[from] hound::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel is not open")]
    ChannelClosed,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
