use crate::engine::Status;

pub type Result<T, E = GuaError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum GuaError {
    /// A command was rejected by the engine.
    #[error("{op} error: {status}")]
    Engine { op: &'static str, status: Status },

    #[error("too many credentials, at most {max} allowed")]
    TooManyCredentials { max: usize },

    #[error("invalid account {0}")]
    InvalidAccount(i32),

    #[error("context is closing")]
    Closing,

    #[error("consumer already set")]
    ConsumerAlreadySet,

    #[error("consumer cannot change once the pipeline is active")]
    PipelineActive,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),
}

impl GuaError {
    pub(crate) fn engine(op: &'static str) -> impl FnOnce(Status) -> GuaError {
        move |status| GuaError::Engine { op, status }
    }

    /// Engine status carried by the error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            GuaError::Engine { status, .. } => Some(*status),
            _ => None,
        }
    }
}
