use thiserror::Error;

/// Errors that can occur while decoding wire messages.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The byte string was not a well-formed message.
    #[error("failed to decode message: {0}")]
    Decode(#[from] minicbor::decode::Error),
}
