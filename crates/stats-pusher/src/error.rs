use fabric_comm::CommError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PusherError {
    /// Sending, tracking or decoding a task failed, or the task answered
    /// with an error.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// A group member was skipped after a failed send.
    #[error("no response for {0}")]
    MissingResponse(String),

    #[error("one or more bundle heartbeats unsuccessful: {0:?}")]
    HeartbeatsFailed(Vec<u64>),

    #[error("invalid configuration: {0}")]
    Config(String),
}
