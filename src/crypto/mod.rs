use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, Result as IoResult};

/// Length in bytes of a transfer checksum (SHA-256)
pub const CHECKSUM_LEN: usize = 32;

const READ_BUFFER_SIZE: usize = 1024 * 64;

/// Running SHA-256 digest fed as payload bytes stream past
#[derive(Clone, Default)]
pub struct ChecksumAccumulator {
    hasher: Sha256,
}

impl ChecksumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consume the accumulator and return the raw digest bytes
    pub fn finalize(self) -> Vec<u8> {
        self.hasher.finalize().to_vec()
    }
}

/// Checksum of an in-memory buffer
pub fn checksum(data: &[u8]) -> Vec<u8> {
    let mut accumulator = ChecksumAccumulator::new();
    accumulator.update(data);
    accumulator.finalize()
}

/// Byte-exact comparison of two checksums
pub fn verify_checksum(expected: &[u8], actual: &[u8]) -> bool {
    expected == actual
}

/// Compute the checksum of a file without loading it into memory
pub async fn compute_file_hash<P: AsRef<Path>>(path: P) -> IoResult<Vec<u8>> {
    let mut file = File::open(path).await?;
    let mut accumulator = ChecksumAccumulator::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let count = file.read(&mut buffer).await?;
        if count == 0 {
            break;
        }
        accumulator.update(&buffer[..count]);
    }

    Ok(accumulator.finalize())
}

/// Hex rendering used in log lines
pub fn to_hex(checksum: &[u8]) -> String {
    hex::encode(checksum)
}
