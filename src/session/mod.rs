pub mod openssh;
pub mod protocol;

#[cfg(test)]
pub mod memory;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectionError, TransferTaskError};
use crate::resolver::ConnectionSpec;
pub use protocol::{Connector, DirEntry, EntryKind, EntryMeta, ProgressFn, RemoteFs};

/// Lifecycle of a session once its channel exists. The time spent
/// connecting is the `SessionManager::open` call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Closing,
    Closed,
    Failed,
}

/// A live channel identified by the spec that created it.
pub struct Session {
    spec: ConnectionSpec,
    fs: Arc<dyn RemoteFs>,
    state: Mutex<SessionState>,
    lost: CancellationToken,
    /// Present when the channel cannot multiplex: one operation at a time
    gate: Option<Semaphore>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("spec", &self.spec)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub fn new(spec: ConnectionSpec, fs: Arc<dyn RemoteFs>) -> Self {
        let gate = (!fs.supports_multiplexing()).then(|| Semaphore::new(1));
        Self {
            spec,
            fs,
            state: Mutex::new(SessionState::Ready),
            lost: CancellationToken::new(),
            gate,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn supports_multiplexing(&self) -> bool {
        self.gate.is_none()
    }

    /// Fires once the session has failed.
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn mark_failed(&self, reason: &str) {
        let mut state = self.lock_state();
        if *state == SessionState::Ready {
            tracing::warn!("Session {} failed: {}", self.spec, reason);
            *state = SessionState::Failed;
            drop(state);
            self.lost.cancel();
        }
    }

    async fn enter(&self) -> Result<Option<SemaphorePermit<'_>>, TransferTaskError> {
        if !self.is_ready() {
            return Err(TransferTaskError::SessionLost);
        }
        match &self.gate {
            Some(gate) => gate
                .acquire()
                .await
                .map(Some)
                .map_err(|_| TransferTaskError::SessionLost),
            None => Ok(None),
        }
    }

    fn check<T>(&self, result: Result<T, TransferTaskError>) -> Result<T, TransferTaskError> {
        if let Err(TransferTaskError::SessionLost) = &result {
            self.mark_failed("channel lost during an operation");
        }
        result
    }

    pub async fn stat(&self, path: &str) -> Result<EntryMeta, TransferTaskError> {
        let _permit = self.enter().await?;
        self.check(self.fs.stat(path).await)
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, TransferTaskError> {
        let _permit = self.enter().await?;
        self.check(self.fs.list_dir(path).await)
    }

    pub async fn make_dir(&self, path: &str) -> Result<(), TransferTaskError> {
        let _permit = self.enter().await?;
        self.check(self.fs.make_dir(path).await)
    }

    pub async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError> {
        let _permit = self.enter().await?;
        self.check(self.fs.upload(local, remote, cancel, progress).await)
    }

    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError> {
        let _permit = self.enter().await?;
        self.check(self.fs.download(remote, local, cancel, progress).await)
    }

    /// Check the channel. A gated session with an operation in flight counts
    /// as alive; that operation reports a lost channel itself.
    pub async fn ping(&self) -> Result<(), TransferTaskError> {
        if !self.is_ready() {
            return Err(TransferTaskError::SessionLost);
        }
        let _permit = match &self.gate {
            Some(gate) => match gate.try_acquire() {
                Ok(permit) => Some(permit),
                Err(TryAcquireError::NoPermits) => {
                    tracing::debug!("Session {} busy, skipping ping", self.spec);
                    return Ok(());
                }
                Err(TryAcquireError::Closed) => return Err(TransferTaskError::SessionLost),
            },
            None => None,
        };
        self.check(self.fs.ping().await)
    }

    /// Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.lock_state();
            match *state {
                SessionState::Closing | SessionState::Closed => return,
                _ => *state = SessionState::Closing,
            }
        }
        self.fs.close().await;
        *self.lock_state() = SessionState::Closed;
        tracing::info!("Session {} closed", self.spec);
    }
}

/// Owns live sessions, at most one per distinct `ConnectionSpec`.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    sessions: tokio::sync::Mutex<HashMap<ConnectionSpec, Arc<Session>>>,
    /// One lock per spec with a connect in progress
    connecting: Mutex<HashMap<ConnectionSpec, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
        }
    }

    fn lock_connecting(&self) -> MutexGuard<'_, HashMap<ConnectionSpec, Arc<tokio::sync::Mutex<()>>>> {
        self.connecting.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn cached(&self, spec: &ConnectionSpec) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        let existing = sessions.get(spec)?;
        if existing.is_ready() {
            return Some(existing.clone());
        }
        tracing::debug!("Evicting {:?} session for {}", existing.state(), spec);
        sessions.remove(spec);
        None
    }

    /// Reuse a ready session for `spec` or connect a new one.
    ///
    /// Concurrent opens of one spec wait on a per-spec lock and share the
    /// resulting channel. The cache itself is only locked briefly, so a slow
    /// host never holds up other specs.
    pub async fn open(&self, spec: ConnectionSpec) -> Result<Arc<Session>, ConnectionError> {
        if let Some(session) = self.cached(&spec).await {
            tracing::debug!("Reusing session for {}", spec);
            return Ok(session);
        }

        let slot = self.lock_connecting().entry(spec.clone()).or_default().clone();
        let result = {
            let _connecting = slot.lock().await;
            match self.cached(&spec).await {
                Some(session) => Ok(session),
                None => self.connect(&spec).await,
            }
        };

        let mut connecting = self.lock_connecting();
        drop(slot);
        // Last one out removes the lock
        if connecting.get(&spec).map_or(false, |s| Arc::strong_count(s) == 1) {
            connecting.remove(&spec);
        }
        drop(connecting);
        result
    }

    async fn connect(&self, spec: &ConnectionSpec) -> Result<Arc<Session>, ConnectionError> {
        tracing::info!("Connecting to {}", spec);
        let fs = match tokio::time::timeout(self.connect_timeout, self.connector.connect(spec)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    target: spec.to_string(),
                    secs: self.connect_timeout.as_secs(),
                })
            }
        };

        let session = Arc::new(Session::new(spec.clone(), fs));
        self.sessions.lock().await.insert(spec.clone(), session.clone());
        Ok(session)
    }

    pub async fn close(&self, session: &Arc<Session>) {
        session.close().await;
        let mut sessions = self.sessions.lock().await;
        if let Some(cached) = sessions.get(session.spec()) {
            if Arc::ptr_eq(cached, session) {
                sessions.remove(session.spec());
            }
        }
    }

    /// Drop failed and closed sessions. Returns how many were evicted.
    pub async fn reap(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_ready());
        before - sessions.len()
    }

    /// Ping every ready session, fail the unresponsive ones and evict them.
    pub async fn health_check(&self) -> usize {
        let live: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock().await;
            sessions.values().filter(|s| s.is_ready()).cloned().collect()
        };
        for session in live {
            match tokio::time::timeout(self.connect_timeout, session.ping()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => session.mark_failed(&e.to_string()),
                Err(_) => session.mark_failed("ping timed out"),
            }
        }
        self.reap().await
    }

    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in drained {
            session.close().await;
        }
    }

    pub async fn live_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
