use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Every message that can appear as a frame on a transfer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum Message {
    /// Client asks to upload `size` bytes under `file_name`
    StorageRequest { file_name: String, size: u64 },
    /// Client asks to download `file_name`
    RetrievalRequest { file_name: String },
    /// Generic status reply
    Response { ok: bool, message: String },
    /// Reply to a retrieval request; `size` raw bytes follow when `ok`
    RetrievalResponse { ok: bool, message: String, size: u64 },
    /// Checksum of the payload that just went over the wire
    ChecksumVerification { checksum: Vec<u8> },
}

impl Message {
    /// Variant name, for log lines and error reporting
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StorageRequest { .. } => "StorageRequest",
            Message::RetrievalRequest { .. } => "RetrievalRequest",
            Message::Response { .. } => "Response",
            Message::RetrievalResponse { .. } => "RetrievalResponse",
            Message::ChecksumVerification { .. } => "ChecksumVerification",
        }
    }
}
