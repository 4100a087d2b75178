/// Failure raised by an operation handler.
#[derive(Clone, Debug, thiserror::Error)]
pub enum OperationError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Any call after `terminate()`.
    #[error("container terminated")]
    Terminated,

    #[error(transparent)]
    Operation(#[from] OperationError),
}
