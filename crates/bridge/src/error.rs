use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] trestle_config::ConfigError),

    #[error("{message}")]
    Message { message: String },
}

impl trestle_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

trestle_common::impl_context!();
