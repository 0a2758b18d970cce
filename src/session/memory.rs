//! In-memory `RemoteFs` and `Connector` used by the session and transfer
//! tests. Supports injected failures, held operations and a dropped link.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::protocol::{Connector, DirEntry, EntryKind, EntryMeta, ProgressFn, RemoteFs};
use crate::error::{ConnectionError, TransferTaskError};
use crate::resolver::ConnectionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Dir,
    File(u64),
}

struct Injected {
    error: TransferTaskError,
    /// `None` fails forever
    remaining: Option<usize>,
}

struct Inner {
    nodes: Mutex<BTreeMap<String, Node>>,
    failures: Mutex<HashMap<String, Injected>>,
    holds: Mutex<HashMap<String, Arc<Semaphore>>>,
    ops: Mutex<Vec<String>>,
    multiplex: AtomicBool,
    dropped: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    close_calls: AtomicUsize,
    latency: Mutex<Duration>,
}

#[derive(Clone)]
pub struct MemoryFs {
    inner: Arc<Inner>,
}

struct InFlight<'a>(&'a Inner);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "/",
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            inner: Arc::new(Inner {
                nodes: Mutex::new(nodes),
                failures: Mutex::new(HashMap::new()),
                holds: Mutex::new(HashMap::new()),
                ops: Mutex::new(Vec::new()),
                multiplex: AtomicBool::new(true),
                dropped: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                latency: Mutex::new(Duration::from_millis(2)),
            }),
        }
    }

    pub fn without_multiplexing(self) -> Self {
        self.inner.multiplex.store(false, Ordering::SeqCst);
        self
    }

    pub fn add_dir(&self, path: &str) {
        let mut nodes = self.inner.nodes.lock().unwrap();
        let mut current = normalize(path);
        while current != "/" {
            nodes.entry(current.clone()).or_insert(Node::Dir);
            current = parent_of(&current).to_string();
        }
    }

    pub fn add_file(&self, path: &str, size: u64) {
        let path = normalize(path);
        self.add_dir(parent_of(&path));
        self.inner.nodes.lock().unwrap().insert(path, Node::File(size));
    }

    pub fn file_size(&self, path: &str) -> Option<u64> {
        match self.inner.nodes.lock().unwrap().get(&normalize(path)) {
            Some(Node::File(size)) => Some(*size),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.inner.nodes.lock().unwrap().get(&normalize(path)) == Some(&Node::Dir)
    }

    pub fn fail_always(&self, path: &str, error: TransferTaskError) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .insert(normalize(path), Injected { error, remaining: None });
    }

    pub fn fail_times(&self, path: &str, error: TransferTaskError, times: usize) {
        self.inner.failures.lock().unwrap().insert(
            normalize(path),
            Injected {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Block operations on `path` until [`MemoryFs::release`].
    pub fn hold(&self, path: &str) {
        self.inner
            .holds
            .lock()
            .unwrap()
            .insert(normalize(path), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = self.inner.holds.lock().unwrap().get(&normalize(path)) {
            gate.add_permits(1);
        }
    }

    pub fn drop_connection(&self) {
        self.inner.dropped.store(true, Ordering::SeqCst);
    }

    /// Operation log, `"<op> <path>"` in start order.
    pub fn ops(&self) -> Vec<String> {
        self.inner.ops.lock().unwrap().clone()
    }

    pub fn started(&self, op: &str, path: &str) -> bool {
        let needle = format!("{} {}", op, normalize(path));
        self.inner.ops.lock().unwrap().iter().any(|o| *o == needle)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock().unwrap() = latency;
    }

    async fn begin(&self, op: &str, path: &str) -> Result<InFlight<'_>, TransferTaskError> {
        if self.inner.dropped.load(Ordering::SeqCst) {
            return Err(TransferTaskError::SessionLost);
        }
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.inner);
        self.inner
            .ops
            .lock()
            .unwrap()
            .push(format!("{} {}", op, normalize(path)));

        let latency = *self.inner.latency.lock().unwrap();
        tokio::time::sleep(latency).await;

        let mut failures = self.inner.failures.lock().unwrap();
        if let Some(injected) = failures.get_mut(&normalize(path)) {
            match injected.remaining.as_mut() {
                None => return Err(injected.error.clone()),
                Some(n) if *n > 0 => {
                    *n -= 1;
                    return Err(injected.error.clone());
                }
                Some(_) => {}
            }
        }
        Ok(guard)
    }

    async fn wait_hold(&self, path: &str, cancel: &CancellationToken) -> Result<(), TransferTaskError> {
        let gate = self.inner.holds.lock().unwrap().get(&normalize(path)).cloned();
        if let Some(gate) = gate {
            tokio::select! {
                _ = gate.acquire() => {}
                _ = cancel.cancelled() => return Err(TransferTaskError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(TransferTaskError::Cancelled);
        }
        if self.inner.dropped.load(Ordering::SeqCst) {
            return Err(TransferTaskError::SessionLost);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn stat(&self, path: &str) -> Result<EntryMeta, TransferTaskError> {
        let _op = self.begin("stat", path).await?;
        match self.inner.nodes.lock().unwrap().get(&normalize(path)) {
            Some(Node::Dir) => Ok(EntryMeta {
                kind: EntryKind::Directory,
                size: 0,
            }),
            Some(Node::File(size)) => Ok(EntryMeta {
                kind: EntryKind::File,
                size: *size,
            }),
            None => Err(TransferTaskError::NotFound(path.to_string())),
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, TransferTaskError> {
        let _op = self.begin("list", path).await?;
        let dir = normalize(path);
        let nodes = self.inner.nodes.lock().unwrap();
        match nodes.get(&dir) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(TransferTaskError::Io(format!("{}: not a directory", path))),
            None => return Err(TransferTaskError::NotFound(path.to_string())),
        }
        Ok(nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && parent_of(p) == dir)
            .map(|(p, node)| DirEntry {
                name: name_of(p).to_string(),
                kind: match node {
                    Node::Dir => EntryKind::Directory,
                    Node::File(_) => EntryKind::File,
                },
                size: match node {
                    Node::Dir => 0,
                    Node::File(size) => *size,
                },
            })
            .collect())
    }

    async fn make_dir(&self, path: &str) -> Result<(), TransferTaskError> {
        let _op = self.begin("mkdir", path).await?;
        if let Some(Node::File(_)) = self.inner.nodes.lock().unwrap().get(&normalize(path)) {
            return Err(TransferTaskError::Io(format!("{}: file exists", path)));
        }
        self.add_dir(path);
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError> {
        let _op = self.begin("upload", remote).await?;
        self.wait_hold(remote, cancel).await?;

        let local_name = local.to_string_lossy();
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| TransferTaskError::from_io(&local_name, e))?;
        if meta.is_dir() {
            return Err(TransferTaskError::IsDirectory(local_name.into_owned()));
        }
        let target = normalize(remote);
        if !self.is_dir(parent_of(&target)) {
            return Err(TransferTaskError::NotFound(remote.to_string()));
        }
        progress(meta.len());
        self.inner
            .nodes
            .lock()
            .unwrap()
            .insert(target, Node::File(meta.len()));
        Ok(meta.len())
    }

    async fn download(
        &self,
        remote: &str,
        local: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError> {
        let _op = self.begin("download", remote).await?;
        self.wait_hold(remote, cancel).await?;

        let size = match self.inner.nodes.lock().unwrap().get(&normalize(remote)) {
            Some(Node::File(size)) => *size,
            Some(Node::Dir) => return Err(TransferTaskError::IsDirectory(remote.to_string())),
            None => return Err(TransferTaskError::NotFound(remote.to_string())),
        };
        tokio::fs::write(local, vec![0u8; size as usize])
            .await
            .map_err(|e| TransferTaskError::from_io(&local.to_string_lossy(), e))?;
        progress(size);
        Ok(size)
    }

    async fn ping(&self) -> Result<(), TransferTaskError> {
        if self.inner.dropped.load(Ordering::SeqCst) {
            Err(TransferTaskError::SessionLost)
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn supports_multiplexing(&self) -> bool {
        self.inner.multiplex.load(Ordering::SeqCst)
    }
}

pub struct MemoryConnector {
    fs: MemoryFs,
    connects: AtomicUsize,
    failure: Mutex<Option<ConnectionError>>,
    delay: Mutex<Option<Duration>>,
    host_delays: Mutex<HashMap<String, Duration>>,
}

impl MemoryConnector {
    pub fn new(fs: MemoryFs) -> Self {
        Self {
            fs,
            connects: AtomicUsize::new(0),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            host_delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, error: ConnectionError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn delay_connect(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Slow down connects to one host only.
    pub fn delay_host(&self, host: &str, delay: Duration) {
        self.host_delays.lock().unwrap().insert(host.to_string(), delay);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Arc<dyn RemoteFs>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let host_delay = self.host_delays.lock().unwrap().get(&spec.host).copied();
        if let Some(delay) = host_delay {
            tokio::time::sleep(delay).await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Arc::new(self.fs.clone()))
    }
}
