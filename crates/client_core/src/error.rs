use shared::sequence::UnknownTemplate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no active connection")]
    NotConnected,
    #[error("failed to encode {kind} message: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("channel writer closed before the message was sent")]
    WriterClosed,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid device id {0}: must be positive")]
    InvalidDevice(i64),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("step duration {duration_ms} ms is outside {min}..={max} ms")]
    DurationOutOfRange { duration_ms: u64, min: u64, max: u64 },
    #[error("sequence is empty")]
    Empty,
    #[error("no active connection")]
    NotConnected,
    #[error("a sequence is already running")]
    AlreadyRunning,
    #[error("sequence cannot be edited while it is running")]
    Busy,
    #[error(transparent)]
    UnknownTemplate(#[from] UnknownTemplate),
    #[error("sequence name must not be empty")]
    EmptyName,
    #[error("saved sequence '{0}' not found")]
    NotFound(String),
    #[error("sequence aborted after {sent} of {total} steps: {source}")]
    Aborted {
        sent: usize,
        total: usize,
        #[source]
        source: ChannelError,
    },
    #[error("sequence store failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
}
