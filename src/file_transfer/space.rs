use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// Reports how many bytes can still be written under a directory
#[async_trait]
pub trait SpaceProbe: Send + Sync {
    async fn available_space(&self, root: &Path) -> io::Result<u64>;
}

/// Asks the filesystem holding `root` (statvfs / GetDiskFreeSpaceEx)
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

#[async_trait]
impl SpaceProbe for FsSpaceProbe {
    async fn available_space(&self, root: &Path) -> io::Result<u64> {
        let root: PathBuf = root.to_path_buf();
        tokio::task::spawn_blocking(move || fs4::available_space(&root))
            .await
            .map_err(io::Error::other)?
    }
}

/// Always reports the same amount of free space
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub u64);

#[async_trait]
impl SpaceProbe for FixedSpaceProbe {
    async fn available_space(&self, _root: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}
