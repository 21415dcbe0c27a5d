// Protocol constants shared by the server and the client

pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Largest encoded message accepted on the wire. Payload bytes never travel
/// inside a frame, so this only bounds control messages.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Length prefix of every frame (big-endian u32)
pub const FRAME_HEADER_LEN: usize = 4;

// Status texts carried in `Message::Response` / `Message::RetrievalResponse`
pub const READY_FOR_DATA: &str = "Ready for data";
pub const FILE_STORED: &str = "File stored successfully";
pub const FILE_EXISTS: &str = "File already exists";
pub const INSUFFICIENT_SPACE: &str = "Insufficient disk space";
pub const DISK_SPACE_UNKNOWN: &str = "Cannot check disk space";
pub const INVALID_FILE_NAME: &str = "Invalid file name";
pub const CHECKSUM_FAILED: &str = "Checksum verification failed";
pub const READY_TO_SEND: &str = "Ready to send";
pub const FILE_NOT_FOUND: &str = "File not found";
