use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressSnapshot, ProgressStream, ProgressTracker, TaskEvent};
use super::tree::{self, Side};
use super::{CancelReason, Direction, JobId, TaskId, TransferSettings};
use crate::error::TransferTaskError;
use crate::session::{EntryKind, Session};

/// Caller-side handle to a running or finished job.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> ProgressStream {
        self.tracker.subscribe()
    }

    pub async fn wait(&self) -> ProgressSnapshot {
        self.tracker.wait().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    fn abort(&self, reason: CancelReason) {
        if self.tracker.set_cancel_reason(reason) {
            match reason {
                CancelReason::User => tracing::info!("Job {} cancelled by user", self.id),
                CancelReason::SessionLost => {
                    tracing::warn!("Job {} cancelled: session lost", self.id);
                    self.tracker.note("session lost, job cancelled");
                }
            }
        }
        self.cancel.cancel();
    }
}

struct Queued {
    task: TaskId,
    source: String,
    dest: String,
}

/// Everything one job's driver and workers share.
struct JobContext {
    handle: JobHandle,
    session: Arc<Session>,
    direction: Direction,
    settings: TransferSettings,
}

impl JobContext {
    fn cancel(&self) -> &CancellationToken {
        &self.handle.cancel
    }

    fn tracker(&self) -> &ProgressTracker {
        &self.handle.tracker
    }

    fn emit(&self, event: TaskEvent) {
        self.handle.tracker.apply(event);
    }

    /// Retry `op` immediately while its error is retryable and the job is live.
    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, TransferTaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferTaskError>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && retries < self.settings.max_retries && !self.cancel().is_cancelled() => {
                    retries += 1;
                    tracing::debug!("Job {}: retrying after {} ({}/{})", self.handle.id, e, retries, self.settings.max_retries);
                }
                other => return other,
            }
        }
    }
}

/// Traversal state: assigns task ids in discovery order and feeds the queue.
struct Discovery<'a> {
    ctx: &'a JobContext,
    queue: mpsc::UnboundedSender<Queued>,
    next_task: TaskId,
}

impl Discovery<'_> {
    fn register(&mut self, source: &str, dest: &str, size: Option<u64>) -> TaskId {
        let task = self.next_task;
        self.next_task += 1;
        self.ctx.emit(TaskEvent::Discovered {
            task,
            source: source.to_string(),
            dest: dest.to_string(),
            size,
        });
        task
    }

    fn enqueue(&mut self, source: String, dest: String, size: Option<u64>) {
        let task = self.register(&source, &dest, size);
        // Workers only stop receiving after cancellation; the sweep in
        // `finish` settles anything left behind.
        let _ = self.queue.send(Queued { task, source, dest });
    }

    /// Record a path that could not be read as a failed task. Returns
    /// false when the error ends traversal.
    fn fail(&mut self, source: &str, dest: &str, error: TransferTaskError) -> bool {
        match error {
            TransferTaskError::Cancelled => false,
            TransferTaskError::SessionLost => {
                self.ctx.handle.abort(CancelReason::SessionLost);
                false
            }
            error => {
                tracing::warn!("Job {}: cannot read {}: {}", self.ctx.handle.id, source, error);
                let task = self.register(source, dest, None);
                self.ctx.emit(TaskEvent::Failed { task, error });
                true
            }
        }
    }

    /// Walk the source level by level. Returns whether traversal ran to the end.
    async fn run(&mut self, source: String, dest: String, recursive: bool) -> bool {
        let ctx = self.ctx;
        let session = &*ctx.session;
        let src_side = Side::source_of(ctx.direction);
        let dst_side = Side::dest_of(ctx.direction);

        let root = {
            let source = source.as_str();
            ctx.with_retries(|| tree::stat(src_side, session, source)).await
        };
        let root = match root {
            Ok(meta) => meta,
            Err(e) => return self.fail(&source, &dest, e),
        };

        if root.kind != EntryKind::Directory {
            self.enqueue(source, dest, Some(root.size));
            return true;
        }
        if !recursive {
            let error = TransferTaskError::IsDirectory(source.clone());
            return self.fail(&source, &dest, error);
        }

        let mut pending = VecDeque::from([(source, dest)]);
        while let Some((src_dir, dst_dir)) = pending.pop_front() {
            if ctx.cancel().is_cancelled() {
                return false;
            }
            let listed = {
                let (src_dir, dst_dir) = (src_dir.as_str(), dst_dir.as_str());
                ctx.with_retries(|| async move {
                    tree::make_dir(dst_side, session, dst_dir).await?;
                    tree::list(src_side, session, src_dir).await
                })
                .await
            };
            let entries = match listed {
                Ok(entries) => entries,
                Err(e) => {
                    if self.fail(&src_dir, &dst_dir, e) {
                        continue;
                    }
                    return false;
                }
            };

            tracing::debug!("Job {}: {} entries in {}", ctx.handle.id, entries.len(), src_dir);
            for entry in entries {
                let child_src = tree::join(src_side, &src_dir, &entry.name);
                let child_dst = tree::join(dst_side, &dst_dir, &entry.name);
                match entry.kind {
                    EntryKind::Directory => pending.push_back((child_src, child_dst)),
                    EntryKind::File => self.enqueue(child_src, child_dst, Some(entry.size)),
                    EntryKind::Symlink => self.enqueue(child_src, child_dst, None),
                }
            }
        }
        true
    }
}

async fn copy_once(ctx: &JobContext, item: &Queued) -> Result<u64, TransferTaskError> {
    let task = item.task;
    let tracker = ctx.tracker();
    let progress = move |bytes: u64| {
        tracker.apply(TaskEvent::Progress { task, bytes });
    };
    match ctx.direction {
        Direction::Upload => {
            ctx.session
                .upload(Path::new(&item.source), &item.dest, ctx.cancel(), &progress)
                .await
        }
        Direction::Download => {
            ctx.session
                .download(&item.source, Path::new(&item.dest), ctx.cancel(), &progress)
                .await
        }
    }
}

async fn run_task(ctx: &JobContext, item: Queued) {
    let mut retries = 0;
    loop {
        match copy_once(ctx, &item).await {
            Ok(bytes) => {
                tracing::debug!("Job {}: copied {} ({} bytes)", ctx.handle.id, item.source, bytes);
                ctx.emit(TaskEvent::Completed { task: item.task, bytes });
                return;
            }
            Err(TransferTaskError::Cancelled) => {
                ctx.emit(TaskEvent::Cancelled { task: item.task });
                return;
            }
            Err(TransferTaskError::SessionLost) => {
                ctx.emit(TaskEvent::Cancelled { task: item.task });
                ctx.handle.abort(CancelReason::SessionLost);
                return;
            }
            Err(e) if e.is_retryable() && retries < ctx.settings.max_retries && !ctx.cancel().is_cancelled() => {
                retries += 1;
                tracing::debug!("Job {}: retrying {} after {}", ctx.handle.id, item.source, e);
                ctx.emit(TaskEvent::Started { task: item.task });
            }
            Err(e) => {
                tracing::warn!("Job {}: {} failed: {}", ctx.handle.id, item.source, e);
                ctx.emit(TaskEvent::Failed { task: item.task, error: e });
                return;
            }
        }
    }
}

async fn worker(ctx: Arc<JobContext>, queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Queued>>>) {
    loop {
        // Start is reported under the queue lock so starts follow discovery order.
        let next = {
            let mut queue = queue.lock().await;
            let next = tokio::select! {
                biased;
                _ = ctx.cancel().cancelled() => None,
                item = queue.recv() => item,
            };
            if let Some(item) = &next {
                ctx.emit(TaskEvent::Started { task: item.task });
            }
            next
        };
        match next {
            Some(item) => run_task(&ctx, item).await,
            None => return,
        }
    }
}

async fn drive(ctx: Arc<JobContext>, source: String, dest: String, recursive: bool) {
    let id = ctx.handle.id;

    let watcher = {
        let lost = ctx.session.lost();
        let handle = ctx.handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lost.cancelled() => handle.abort(CancelReason::SessionLost),
                _ = handle.cancel.cancelled() => {}
            }
        })
    };

    let workers = if ctx.session.supports_multiplexing() {
        ctx.settings.max_workers.max(1)
    } else {
        1
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let pool: Vec<_> = (0..workers)
        .map(|_| tokio::spawn(worker(ctx.clone(), rx.clone())))
        .collect();

    let complete = {
        let mut discovery = Discovery {
            ctx: &ctx,
            queue: tx,
            next_task: 0,
        };
        discovery.run(source, dest, recursive).await
    };
    ctx.emit(TaskEvent::DiscoveryFinished);
    tracing::debug!("Job {}: discovery {}", id, if complete { "finished" } else { "stopped" });

    for handle in pool {
        if let Err(e) = handle.await {
            tracing::error!("Job {}: worker panicked: {}", id, e);
        }
    }
    watcher.abort();

    let status = ctx.tracker().finish(complete, ctx.cancel().is_cancelled());
    let snap = ctx.tracker().snapshot();
    tracing::info!(
        "Job {} {}: {} done, {} failed, {} cancelled of {}",
        id,
        status.label(),
        snap.files_done,
        snap.files_failed,
        snap.files_cancelled,
        snap.files_total
    );
}

/// Runs copy jobs over sessions and keeps their progress trackers.
pub struct TransferEngine {
    settings: TransferSettings,
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<JobId, JobHandle>>,
}

impl TransferEngine {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings,
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, BTreeMap<JobId, JobHandle>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Start copying `source` to `dest`. `dest` names the copy of the root
    /// itself. Must be called from within a tokio runtime.
    pub fn start_job(
        &self,
        session: Arc<Session>,
        source: impl Into<String>,
        dest: impl Into<String>,
        direction: Direction,
        recursive: bool,
    ) -> JobHandle {
        let (source, dest) = (source.into(), dest.into());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = JobHandle {
            id,
            cancel: CancellationToken::new(),
            tracker: Arc::new(ProgressTracker::new(
                id,
                direction,
                &source,
                &dest,
                self.settings.recent_activity,
            )),
        };
        tracing::info!(
            "Job {}: {} {} -> {} via {} (recursive: {})",
            id,
            direction.label(),
            source,
            dest,
            session.spec(),
            recursive
        );

        let ctx = Arc::new(JobContext {
            handle: handle.clone(),
            session,
            direction,
            settings: self.settings.clone(),
        });
        tokio::spawn(drive(ctx, source, dest, recursive));

        self.lock_jobs().insert(id, handle.clone());
        handle
    }

    pub fn cancel(&self, handle: &JobHandle) {
        handle.abort(CancelReason::User);
    }

    pub fn cancel_all(&self) {
        let handles: Vec<JobHandle> = self.lock_jobs().values().cloned().collect();
        for handle in handles {
            if !handle.snapshot().status.is_terminal() {
                self.cancel(&handle);
            }
        }
    }

    pub fn snapshot(&self, handle: &JobHandle) -> ProgressSnapshot {
        handle.snapshot()
    }

    pub fn subscribe(&self, handle: &JobHandle) -> ProgressStream {
        handle.subscribe()
    }

    pub async fn wait(&self, handle: &JobHandle) -> ProgressSnapshot {
        handle.wait().await
    }

    /// Snapshots of every known job, oldest first.
    pub fn jobs(&self) -> Vec<ProgressSnapshot> {
        self.lock_jobs().values().map(JobHandle::snapshot).collect()
    }

    /// Newest job that has not reached a terminal status.
    pub fn latest_active(&self) -> Option<JobHandle> {
        self.lock_jobs()
            .values()
            .rev()
            .find(|h| !h.snapshot().status.is_terminal())
            .cloned()
    }

    /// Forget the oldest terminal jobs, keeping the newest `keep` of them.
    /// Running jobs are never dropped. Returns how many were forgotten.
    pub fn prune_finished(&self, keep: usize) -> usize {
        let mut jobs = self.lock_jobs();
        let finished: Vec<JobId> = jobs
            .iter()
            .filter(|(_, h)| h.snapshot().status.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        let excess = finished.len().saturating_sub(keep);
        for id in &finished[..excess] {
            jobs.remove(id);
        }
        excess
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.lock_jobs().contains_key(&id)
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(TransferSettings::default())
    }
}
