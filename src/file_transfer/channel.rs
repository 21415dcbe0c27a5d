use std::io;
use std::time::Duration;

use bincode::config;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use super::error::TransferError;
use super::stream::with_deadline;
use super::types::Message;
use crate::protocol::{FRAME_HEADER_LEN, MAX_FRAME_LEN};

/// Typed message exchange over one connection.
///
/// Frames are a 4-byte big-endian length followed by the bincode encoding of a
/// [`Message`]. Between frames the same stream can carry raw payload bytes;
/// use [`MessageChannel::payload`] for that so reads go through the same
/// buffer as frame decoding and nothing is lost between the two modes.
pub struct MessageChannel<S> {
    stream: BufReader<S>,
    idle_timeout: Option<Duration>,
    closed: bool,
}

impl<S> MessageChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            idle_timeout: None,
            closed: false,
        }
    }

    /// Bound every receive and every payload read/write by `timeout`
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Receive the next message.
    ///
    /// `Ok(None)` means the peer ended the stream cleanly at a frame boundary,
    /// or this side already closed the channel.
    pub async fn receive(&mut self) -> Result<Option<Message>, TransferError> {
        if self.closed {
            return Ok(None);
        }
        let deadline = self.idle_timeout;
        with_deadline(deadline, self.read_frame()).await
    }

    async fn read_frame(&mut self) -> Result<Option<Message>, TransferError> {
        // Read length prefix, tolerating a clean close before the first byte
        let mut len_bytes = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < FRAME_HEADER_LEN {
            let count = self.stream.read(&mut len_bytes[filled..]).await?;
            if count == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a frame header",
                )
                .into());
            }
            filled += count;
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransferError::FrameTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        self.stream.read_exact(&mut buffer).await?;

        let (message, _): (Message, usize) =
            bincode::decode_from_slice(&buffer, config::standard())?;
        trace!("Received {}", message.kind());
        Ok(Some(message))
    }

    /// Encode and send one message, flushing it onto the wire
    pub async fn send(&mut self, message: &Message) -> Result<(), TransferError> {
        if self.closed {
            return Err(TransferError::ChannelClosed);
        }

        let data = bincode::encode_to_vec(message, config::standard())?;
        if data.len() > MAX_FRAME_LEN {
            return Err(TransferError::FrameTooLarge(data.len()));
        }

        let deadline = self.idle_timeout;
        let stream = &mut self.stream;
        with_deadline(deadline, async move {
            stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
            stream.write_all(&data).await?;
            stream.flush().await?;
            Ok::<_, TransferError>(())
        })
        .await?;
        trace!("Sent {}", message.kind());
        Ok(())
    }

    pub async fn send_response(&mut self, ok: bool, message: &str) -> Result<(), TransferError> {
        self.send(&Message::Response {
            ok,
            message: message.to_string(),
        })
        .await
    }

    pub async fn send_retrieval_response(
        &mut self,
        ok: bool,
        message: &str,
        size: u64,
    ) -> Result<(), TransferError> {
        self.send(&Message::RetrievalResponse {
            ok,
            message: message.to_string(),
            size,
        })
        .await
    }

    pub async fn send_checksum_verification(
        &mut self,
        checksum: Vec<u8>,
    ) -> Result<(), TransferError> {
        self.send(&Message::ChecksumVerification { checksum }).await
    }

    /// Raw byte stream of the connection, for payload transfer between frames.
    /// Reads are served from the channel's buffer, writes go straight through.
    pub fn payload(&mut self) -> &mut BufReader<S> {
        &mut self.stream
    }

    /// Shut down the write side and refuse further traffic. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!("Error shutting down connection: {}", e);
        }
    }
}
