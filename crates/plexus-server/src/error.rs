use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e.to_string())
    }
}
