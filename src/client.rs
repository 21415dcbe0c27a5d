use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::crypto;
use crate::file_transfer::{copy_with_checksum, Message, MessageChannel, TransferError};
use crate::protocol::INVALID_FILE_NAME;
use crate::utils;

/// Client side of the transfer protocol
pub struct TransferClient<S> {
    channel: MessageChannel<S>,
}

impl TransferClient<TcpStream> {
    /// Connect to a server
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransferError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> TransferClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            channel: MessageChannel::new(stream),
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.channel = self.channel.with_idle_timeout(timeout);
        self
    }

    /// Underlying channel, for speaking the protocol by hand
    pub fn channel(&mut self) -> &mut MessageChannel<S> {
        &mut self.channel
    }

    /// Upload `local_path` to the server as `remote_name`.
    ///
    /// Returns the server's final status text. A refusal, before or after the
    /// payload, comes back as `TransferError::Rejected`.
    pub async fn store(
        &mut self,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<String, TransferError> {
        let size = fs::metadata(local_path).await?.len();
        info!(
            "Storing {} as {} ({})",
            local_path.display(),
            remote_name,
            utils::format_size(size)
        );

        self.channel
            .send(&Message::StorageRequest {
                file_name: remote_name.to_string(),
                size,
            })
            .await?;
        let ready = expect_response(self.channel.receive().await?)?;
        debug!("Server: {}", ready);

        let mut file = File::open(local_path).await?;
        let idle_timeout = self.channel.idle_timeout();
        let checksum =
            copy_with_checksum(&mut file, self.channel.payload(), size, idle_timeout).await?;
        drop(file);

        self.channel.send_checksum_verification(checksum).await?;
        expect_response(self.channel.receive().await?)
    }

    /// Download `remote_name` into `dest_dir`, verifying the checksum the
    /// server sends after the payload. The local file is created before the
    /// request goes out, so a local failure never leaves the connection
    /// mid-transfer. On any later failure the partial local copy is removed.
    pub async fn retrieve(
        &mut self,
        remote_name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        let name = utils::sanitize_file_name(remote_name)
            .ok_or_else(|| TransferError::Rejected(INVALID_FILE_NAME.to_string()))?;

        let dest = dest_dir.join(&name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .await?;

        match self.request_file(remote_name, file).await {
            Ok(()) => Ok(dest),
            Err(e) => {
                warn!("Discarding {}: {}", dest.display(), e);
                if let Err(remove_err) = fs::remove_file(&dest).await {
                    warn!("Failed to remove {}: {}", dest.display(), remove_err);
                }
                Err(e)
            }
        }
    }

    async fn request_file(&mut self, remote_name: &str, file: File) -> Result<(), TransferError> {
        self.channel
            .send(&Message::RetrievalRequest {
                file_name: remote_name.to_string(),
            })
            .await?;

        let size = match self.channel.receive().await? {
            Some(Message::RetrievalResponse { ok: true, size, .. }) => size,
            Some(Message::RetrievalResponse { ok: false, message, .. }) => {
                return Err(TransferError::Rejected(message));
            }
            Some(other) => return Err(TransferError::UnexpectedMessage(other.kind())),
            None => return Err(TransferError::ChannelClosed),
        };
        info!("Retrieving {} ({})", remote_name, utils::format_size(size));

        self.receive_verified(file, size).await
    }

    async fn receive_verified(&mut self, mut file: File, size: u64) -> Result<(), TransferError> {
        let idle_timeout = self.channel.idle_timeout();
        let local =
            copy_with_checksum(self.channel.payload(), &mut file, size, idle_timeout).await?;
        file.sync_all().await?;
        drop(file);

        let remote = match self.channel.receive().await? {
            Some(Message::ChecksumVerification { checksum }) => checksum,
            Some(other) => return Err(TransferError::UnexpectedMessage(other.kind())),
            None => return Err(TransferError::ChannelClosed),
        };

        if crypto::verify_checksum(&local, &remote) {
            Ok(())
        } else {
            Err(TransferError::ChecksumMismatch)
        }
    }

    /// End the session
    pub async fn close(mut self) {
        self.channel.close().await;
    }
}

/// Unwrap a status response: `ok` yields its text, a refusal becomes an error
fn expect_response(message: Option<Message>) -> Result<String, TransferError> {
    match message {
        Some(Message::Response { ok: true, message }) => Ok(message),
        Some(Message::Response { ok: false, message }) => Err(TransferError::Rejected(message)),
        Some(other) => Err(TransferError::UnexpectedMessage(other.kind())),
        None => Err(TransferError::ChannelClosed),
    }
}
