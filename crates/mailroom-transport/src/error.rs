/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// This tab's end of the channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The origin lacks the requested primitive (e.g. no broadcast
    /// channel support).
    #[error("{0} is not supported by this origin")]
    Unsupported(&'static str),

    /// Durable storage is full.
    #[error("storage quota exceeded writing {key:?}")]
    QuotaExceeded { key: String },

    /// The payload can't be carried by this channel.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
