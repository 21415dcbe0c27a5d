pub mod channel;
pub mod error;
pub mod handler;
pub mod space;
pub mod stream;
pub mod types;

// Re-exports for easier access from crate::file_transfer::{...}
pub use channel::MessageChannel;
pub use error::TransferError;
pub use handler::FileTransferHandler;
pub use space::{FixedSpaceProbe, FsSpaceProbe, SpaceProbe};
pub use stream::copy_with_checksum;
pub use types::Message;

// Avoid wildcard re-exports to keep the public API explicit and lints clean
