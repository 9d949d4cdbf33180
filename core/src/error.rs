use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("serialize error: {0}")]
    Serialize(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
