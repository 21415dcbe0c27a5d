pub mod client;
pub mod config;
pub mod crypto;
pub mod file_transfer;
pub mod network;
pub mod protocol;
pub mod utils;

// Re-export key types for easier access in integration tests
pub use client::TransferClient;
pub use config::ServerConfig;
pub use file_transfer::{FileTransferHandler, Message, MessageChannel, TransferError};
pub use network::{serve, start_server};
