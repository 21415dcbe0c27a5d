use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use super::channel::MessageChannel;
use super::error::TransferError;
use super::space::{FsSpaceProbe, SpaceProbe};
use super::stream::copy_with_checksum;
use super::types::Message;
use crate::config::ServerConfig;
use crate::crypto;
use crate::protocol::{
    CHECKSUM_FAILED, DISK_SPACE_UNKNOWN, FILE_EXISTS, FILE_NOT_FOUND, FILE_STORED,
    INSUFFICIENT_SPACE, INVALID_FILE_NAME, READY_FOR_DATA, READY_TO_SEND,
};
use crate::utils;

/// Serves storage and retrieval requests against one storage directory.
///
/// A single handler is shared by every connection. It holds no per-connection
/// state; concurrent stores to the same name are arbitrated by exclusive file
/// creation alone.
pub struct FileTransferHandler {
    /// Directory where transferred files are stored
    storage_dir: PathBuf,
    space_probe: Arc<dyn SpaceProbe>,
    idle_timeout: Option<Duration>,
}

impl FileTransferHandler {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            space_probe: Arc::new(FsSpaceProbe),
            idle_timeout: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.storage_dir.clone()).with_idle_timeout(config.idle_timeout())
    }

    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = probe;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Run the request loop over a freshly accepted stream
    pub async fn serve<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut channel = MessageChannel::new(stream).with_idle_timeout(self.idle_timeout);
        self.handle_connection(&mut channel).await;
    }

    /// Process requests one at a time until the peer goes away, a receive
    /// fails, or a workflow leaves the channel unusable. The channel is
    /// always closed on return.
    pub async fn handle_connection<S>(&self, channel: &mut MessageChannel<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let message = match channel.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("Connection finished");
                    break;
                }
                Err(e) => {
                    warn!("Failed to receive request: {}", e);
                    break;
                }
            };

            let outcome = match message {
                Message::StorageRequest { file_name, size } => {
                    self.handle_storage(channel, &file_name, size).await
                }
                Message::RetrievalRequest { file_name } => {
                    self.handle_retrieval(channel, &file_name).await
                }
                other => {
                    warn!("Unexpected message type: {}", other.kind());
                    Ok(())
                }
            };

            if let Err(e) = outcome {
                error!("Terminating connection: {}", e);
                break;
            }
        }

        channel.close().await;
    }

    async fn handle_storage<S>(
        &self,
        channel: &mut MessageChannel<S>,
        file_name: &str,
        size: u64,
    ) -> Result<(), TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(name) = utils::sanitize_file_name(file_name) else {
            warn!("Rejected store of invalid file name {:?}", file_name);
            return reject_storage(channel, INVALID_FILE_NAME).await;
        };
        let path = self.storage_dir.join(&name);
        info!("Attempting to store {} ({})", name, utils::format_size(size));

        if fs::metadata(&path).await.is_ok() {
            info!("{} already exists", name);
            return reject_storage(channel, FILE_EXISTS).await;
        }

        let available = match self.space_probe.available_space(&self.storage_dir).await {
            Ok(available) => available,
            Err(e) => {
                error!("Cannot check disk space: {}", e);
                return reject_storage(channel, DISK_SPACE_UNKNOWN).await;
            }
        };
        if available < size {
            warn!(
                "Not enough space for {}: {} requested, {} available",
                name,
                utils::format_size(size),
                utils::format_size(available)
            );
            return reject_storage(channel, INSUFFICIENT_SPACE).await;
        }

        // The existence check above is advisory; create_new is the real guard
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to create {}: {}", name, e);
                return reject_storage(channel, &e.to_string()).await;
            }
        };

        let server_checksum = match self.receive_payload(channel, file, size).await {
            Ok(checksum) => checksum,
            Err(e) => {
                remove_file(&path).await;
                return Err(e);
            }
        };

        let client_checksum = match channel.receive().await {
            Ok(Some(Message::ChecksumVerification { checksum })) => Some(checksum),
            Ok(Some(other)) => {
                warn!("Expected ChecksumVerification, got {}", other.kind());
                None
            }
            Ok(None) => {
                warn!("Connection closed before the checksum for {} arrived", name);
                remove_file(&path).await;
                return Ok(());
            }
            Err(e) => {
                error!("Error receiving checksum: {}", e);
                remove_file(&path).await;
                return Err(e);
            }
        };

        match client_checksum {
            Some(checksum) if crypto::verify_checksum(&server_checksum, &checksum) => {
                info!("Successfully stored {}", name);
                channel.send_response(true, FILE_STORED).await
            }
            Some(checksum) => {
                warn!(
                    "FAILED to store {}. Invalid checksum {} (expected {})",
                    name,
                    crypto::to_hex(&checksum),
                    crypto::to_hex(&server_checksum)
                );
                remove_file(&path).await;
                channel.send_response(false, CHECKSUM_FAILED).await
            }
            None => {
                remove_file(&path).await;
                channel.send_response(false, CHECKSUM_FAILED).await
            }
        }
    }

    /// Announce readiness, then write exactly `size` payload bytes into `file`
    async fn receive_payload<S>(
        &self,
        channel: &mut MessageChannel<S>,
        mut file: File,
        size: u64,
    ) -> Result<Vec<u8>, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        channel.send_response(true, READY_FOR_DATA).await?;

        let idle_timeout = channel.idle_timeout();
        let checksum =
            copy_with_checksum(channel.payload(), &mut file, size, idle_timeout).await?;
        file.sync_all().await?;
        debug!("Received {} bytes, checksum {}", size, crypto::to_hex(&checksum));
        Ok(checksum)
    }

    async fn handle_retrieval<S>(
        &self,
        channel: &mut MessageChannel<S>,
        file_name: &str,
    ) -> Result<(), TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let found = match utils::sanitize_file_name(file_name) {
            Some(name) => {
                let path = self.storage_dir.join(&name);
                match fs::metadata(&path).await {
                    Ok(metadata) if metadata.is_file() => Some((name, path, metadata.len())),
                    Ok(_) => {
                        info!("{} is not a regular file", name);
                        None
                    }
                    Err(e) => {
                        info!("File not found: {}", e);
                        None
                    }
                }
            }
            None => {
                warn!("Rejected retrieval of invalid file name {:?}", file_name);
                None
            }
        };

        let Some((name, path, size)) = found else {
            channel.send_retrieval_response(false, FILE_NOT_FOUND, 0).await?;
            channel.close().await;
            return Ok(());
        };

        info!("Attempting to retrieve {} ({})", name, utils::format_size(size));
        channel.send_retrieval_response(true, READY_TO_SEND, size).await?;

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                error!("Error opening {}: {}", name, e);
                return Ok(());
            }
        };

        let idle_timeout = channel.idle_timeout();
        let checksum =
            copy_with_checksum(&mut file, channel.payload(), size, idle_timeout).await?;
        drop(file);

        debug!("Sent {} bytes of {}", size, name);
        channel.send_checksum_verification(checksum).await
    }
}

/// Report a pre-transfer failure and hang up
async fn reject_storage<S>(
    channel: &mut MessageChannel<S>,
    message: &str,
) -> Result<(), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send_response(false, message).await?;
    channel.close().await;
    Ok(())
}

async fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        error!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_transfer::space::FixedSpaceProbe;
    use async_trait::async_trait;
    use std::io;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    /// A filesystem that cannot report its free space
    struct UnavailableSpace;

    #[async_trait]
    impl SpaceProbe for UnavailableSpace {
        async fn available_space(&self, _root: &Path) -> io::Result<u64> {
            Err(io::Error::other("statvfs failed"))
        }
    }

    fn spawn_handler(
        handler: FileTransferHandler,
    ) -> (MessageChannel<DuplexStream>, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { handler.serve(server).await });
        (MessageChannel::new(client), task)
    }

    fn response(ok: bool, message: &str) -> Option<Message> {
        Some(Message::Response {
            ok,
            message: message.to_string(),
        })
    }

    async fn upload(
        channel: &mut MessageChannel<DuplexStream>,
        name: &str,
        data: &[u8],
        checksum: Vec<u8>,
    ) -> Option<Message> {
        channel
            .send(&Message::StorageRequest {
                file_name: name.to_string(),
                size: data.len() as u64,
            })
            .await
            .unwrap();
        assert_eq!(channel.receive().await.unwrap(), response(true, READY_FOR_DATA));
        channel.payload().write_all(data).await.unwrap();
        channel.payload().flush().await.unwrap();
        channel.send_checksum_verification(checksum).await.unwrap();
        channel.receive().await.unwrap()
    }

    #[tokio::test]
    async fn test_store_with_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));
        let data = b"hello, storage".to_vec();

        let reply = upload(&mut client, "hello.txt", &data, crypto::checksum(&data)).await;

        assert_eq!(reply, response(true, FILE_STORED));
        assert_eq!(std::fs::read(dir.path().join("hello.txt")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_store_with_bad_checksum_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));

        let reply = upload(&mut client, "bad.bin", b"some bytes", vec![0; 32]).await;

        assert_eq!(reply, response(false, CHECKSUM_FAILED));
        assert!(!dir.path().join("bad.bin").exists());

        // Integrity failures keep the connection open for another request
        let data = b"second try".to_vec();
        let reply = upload(&mut client, "bad.bin", &data, crypto::checksum(&data)).await;
        assert_eq!(reply, response(true, FILE_STORED));
    }

    #[tokio::test]
    async fn test_wrong_message_instead_of_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::StorageRequest {
                file_name: "x".to_string(),
                size: 3,
            })
            .await
            .unwrap();
        assert_eq!(client.receive().await.unwrap(), response(true, READY_FOR_DATA));
        client.payload().write_all(b"abc").await.unwrap();
        client.send_response(true, "not a checksum").await.unwrap();

        assert_eq!(client.receive().await.unwrap(), response(false, CHECKSUM_FAILED));
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_store_existing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("taken.txt"), b"original").unwrap();
        let (mut client, task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::StorageRequest {
                file_name: "taken.txt".to_string(),
                size: 3,
            })
            .await
            .unwrap();

        assert_eq!(client.receive().await.unwrap(), response(false, FILE_EXISTS));
        // Pre-transfer failures end the session
        assert_eq!(client.receive().await.unwrap(), None);
        task.await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("taken.txt")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_store_without_space_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FileTransferHandler::new(dir.path())
            .with_space_probe(Arc::new(FixedSpaceProbe(10)));
        let (mut client, _task) = spawn_handler(handler);

        client
            .send(&Message::StorageRequest {
                file_name: "big.iso".to_string(),
                size: 11,
            })
            .await
            .unwrap();

        assert_eq!(client.receive().await.unwrap(), response(false, INSUFFICIENT_SPACE));
        assert!(!dir.path().join("big.iso").exists());
    }

    #[tokio::test]
    async fn test_store_with_unknown_free_space_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let handler =
            FileTransferHandler::new(dir.path()).with_space_probe(Arc::new(UnavailableSpace));
        let (mut client, task) = spawn_handler(handler);

        client
            .send(&Message::StorageRequest {
                file_name: "report.pdf".to_string(),
                size: 1,
            })
            .await
            .unwrap();

        assert_eq!(client.receive().await.unwrap(), response(false, DISK_SPACE_UNKNOWN));
        assert_eq!(client.receive().await.unwrap(), None);
        task.await.unwrap();
        assert!(!dir.path().join("report.pdf").exists());
    }

    #[tokio::test]
    async fn test_store_invalid_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::StorageRequest {
                file_name: "../..".to_string(),
                size: 1,
            })
            .await
            .unwrap();

        assert_eq!(client.receive().await.unwrap(), response(false, INVALID_FILE_NAME));
    }

    #[tokio::test]
    async fn test_truncated_upload_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::StorageRequest {
                file_name: "partial.bin".to_string(),
                size: 100,
            })
            .await
            .unwrap();
        assert_eq!(client.receive().await.unwrap(), response(true, READY_FOR_DATA));
        client.payload().write_all(&[1; 10]).await.unwrap();
        client.close().await;

        task.await.unwrap();
        assert!(!dir.path().join("partial.bin").exists());
    }

    #[tokio::test]
    async fn test_retrieve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 7) as u8).collect();
        std::fs::write(dir.path().join("data.bin"), &data).unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::RetrievalRequest {
                file_name: "data.bin".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            client.receive().await.unwrap(),
            Some(Message::RetrievalResponse {
                ok: true,
                message: READY_TO_SEND.to_string(),
                size: data.len() as u64,
            })
        );
        let mut received = vec![0u8; data.len()];
        client.payload().read_exact(&mut received).await.unwrap();
        assert_eq!(received, data);
        assert_eq!(
            client.receive().await.unwrap(),
            Some(Message::ChecksumVerification {
                checksum: crypto::checksum(&data)
            })
        );
    }

    #[tokio::test]
    async fn test_retrieve_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::RetrievalRequest {
                file_name: "nope.txt".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            client.receive().await.unwrap(),
            Some(Message::RetrievalResponse {
                ok: false,
                message: FILE_NOT_FOUND.to_string(),
                size: 0,
            })
        );
        assert_eq!(client.receive().await.unwrap(), None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_retrieve_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client
            .send(&Message::RetrievalRequest {
                file_name: "sub".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            client.receive().await.unwrap(),
            Some(Message::RetrievalResponse { ok: false, size: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_message_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let (mut client, _task) = spawn_handler(FileTransferHandler::new(dir.path()));

        client.send_response(true, "hello?").await.unwrap();
        client
            .send(&Message::RetrievalRequest {
                file_name: "a.txt".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            client.receive().await.unwrap(),
            Some(Message::RetrievalResponse { ok: true, size: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_receive_error_terminates_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, task) = spawn_handler(FileTransferHandler::new(dir.path()));

        // A frame whose body is not a valid message
        client.payload().write_all(&4u32.to_be_bytes()).await.unwrap();
        client.payload().write_all(&[0xff; 4]).await.unwrap();
        client.payload().flush().await.unwrap();

        task.await.unwrap();
        assert_eq!(client.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_idle_client_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FileTransferHandler::new(dir.path())
            .with_idle_timeout(Some(Duration::from_millis(50)));
        let (mut client, task) = spawn_handler(handler);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("handler should give up on an idle client")
            .unwrap();
        assert_eq!(client.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stalled_upload_times_out_and_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FileTransferHandler::new(dir.path())
            .with_idle_timeout(Some(Duration::from_millis(50)));
        let (mut client, task) = spawn_handler(handler);

        client
            .send(&Message::StorageRequest {
                file_name: "stalled.bin".to_string(),
                size: 100,
            })
            .await
            .unwrap();
        assert_eq!(client.receive().await.unwrap(), response(true, READY_FOR_DATA));
        client.payload().write_all(&[7; 10]).await.unwrap();
        client.payload().flush().await.unwrap();

        // The client stays connected but never sends the rest
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("handler should give up on a stalled upload")
            .unwrap();
        assert!(!dir.path().join("stalled.bin").exists());
        assert_eq!(client.receive().await.unwrap(), None);
    }
}
