use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectionError, TransferTaskError};
use crate::resolver::ConnectionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Never descended into during traversal; copied like a file
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub kind: EntryKind,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Receives the cumulative byte count of the file being copied.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// File-transfer capability over one established channel.
///
/// Copies observe `cancel` at their next I/O boundary and return
/// [`TransferTaskError::Cancelled`]. A broken channel is reported as
/// [`TransferTaskError::SessionLost`].
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn stat(&self, path: &str) -> Result<EntryMeta, TransferTaskError>;

    /// Children of `path`, without `.` and `..`.
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, TransferTaskError>;

    /// Create `path` and its parents. Existing directories are not an error.
    async fn make_dir(&self, path: &str) -> Result<(), TransferTaskError>;

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError>;

    async fn download(
        &self,
        remote: &str,
        local: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), TransferTaskError>;

    async fn close(&self);

    /// Whether several copies may run over this channel at once.
    fn supports_multiplexing(&self) -> bool;
}

/// Establishes channels. Implementations must not print banners or prompt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Arc<dyn RemoteFs>, ConnectionError>;
}
