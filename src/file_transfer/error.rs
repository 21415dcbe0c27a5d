use std::time::Duration;
use thiserror::Error;

/// Errors raised while exchanging messages or payload bytes
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("No progress for {0:?}")]
    Timeout(Duration),

    #[error("Unexpected message type: {0}")]
    UnexpectedMessage(&'static str),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Checksum verification failed")]
    ChecksumMismatch,
}
