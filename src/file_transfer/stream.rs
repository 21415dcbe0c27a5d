use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::TransferError;
use crate::crypto::ChecksumAccumulator;

const CHUNK_SIZE: usize = 64 * 1024; // 64KB chunks

/// Run `fut`, failing with `TransferError::Timeout` if it does not finish
/// within `deadline`. `None` waits forever.
pub async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransferError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Copy exactly `len` bytes from `reader` to `writer`, feeding every byte
/// through a checksum accumulator on the way. Works in both directions
/// (socket to file on upload, file to socket on download).
///
/// `idle_timeout` bounds each individual read and write, not the whole copy.
/// Returns the checksum of the copied bytes. The writer is flushed before
/// returning; an early end of `reader` is an `UnexpectedEof` error.
pub async fn copy_with_checksum<R, W>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    idle_timeout: Option<Duration>,
) -> Result<Vec<u8>, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut accumulator = ChecksumAccumulator::new();
    let mut buffer = vec![0u8; CHUNK_SIZE.min(len as usize).max(1)];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let count = with_deadline(idle_timeout, async {
            reader.read(&mut buffer[..want]).await.map_err(TransferError::from)
        })
        .await?;

        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended with {} of {} bytes outstanding", remaining, len),
            )
            .into());
        }

        accumulator.update(&buffer[..count]);
        with_deadline(idle_timeout, async {
            writer.write_all(&buffer[..count]).await.map_err(TransferError::from)
        })
        .await?;
        remaining -= count as u64;
    }

    with_deadline(idle_timeout, async { writer.flush().await.map_err(TransferError::from) }).await?;
    Ok(accumulator.finalize())
}
