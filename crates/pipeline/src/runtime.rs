//! Shared session runtime: file table, byte accounting, status, events.
//!
//! Stages report what happened; the runtime converts that into per-file
//! progress, global speed/ETA, and the outward event stream. It never
//! calls back into stage internals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::estimator::UploadEstimator;
use crate::events::{PipelineEvent, SessionSnapshot, SessionStatus};
use crate::state::{FileEvent, FileState, StateChange, UploadStatus};
use crate::types::UploadRequest;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress-relevant shape of a request, captured before the request is
/// handed to the transport.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub id: Uuid,
    pub total_size: u64,
    /// Distinct referenced files, in attachment order.
    pub files: Vec<Uuid>,
    /// `(file, bytes)` per fragment attachment; only fragments count
    /// toward byte progress.
    pub fragment_shares: Vec<(Uuid, u64)>,
}

impl From<&UploadRequest> for RequestMeta {
    fn from(request: &UploadRequest) -> Self {
        let fragment_shares = request
            .attachments
            .iter()
            .filter(|a| a.is_fragment())
            .map(|a| (a.file_id, a.bytes.len() as u64))
            .collect();
        Self {
            id: request.id,
            total_size: request.total_size,
            files: request.file_ids(),
            fragment_shares,
        }
    }
}

#[derive(Default)]
struct Counters {
    uploaded: u64,
    total: u64,
    pending_scan: usize,
}

struct Inner {
    files: Mutex<HashMap<Uuid, FileState>>,
    counters: Mutex<Counters>,
    estimator: Mutex<UploadEstimator>,
    /// Cumulative wire bytes observed per in-flight request.
    request_sent: Mutex<HashMap<Uuid, u64>>,
    status_tx: watch::Sender<SessionStatus>,
    events: broadcast::Sender<PipelineEvent>,
}

/// Cloneable handle to the session runtime.
#[derive(Clone)]
pub struct UploadRuntime {
    inner: Arc<Inner>,
}

impl Default for UploadRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadRuntime {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                files: Mutex::new(HashMap::new()),
                counters: Mutex::new(Counters::default()),
                estimator: Mutex::new(UploadEstimator::default()),
                request_sent: Mutex::new(HashMap::new()),
                status_tx,
                events,
            }),
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Subscribes to the outward event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    // ---- session status ----

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn set_status(&self, status: SessionStatus) {
        let changed = self.inner.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!(?status, "session status");
            self.emit(PipelineEvent::StatusChanged(status));
        }
    }

    /// Suspends the caller until the session is uploading.
    pub async fn wait_until_uploading(&self) {
        let mut rx = self.watch_status();
        while *rx.borrow_and_update() != SessionStatus::Uploading {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    // ---- file table ----

    /// Enters a file into the session. Its size joins the byte total.
    pub fn register_file(&self, state: FileState) {
        let size = state.size;
        let id = state.id;
        {
            let mut files = Self::lock(&self.inner.files);
            debug_assert!(!files.contains_key(&id), "file registered twice");
            files.insert(id, state);
        }
        Self::lock(&self.inner.counters).total += size;
        self.emit_progress();
    }

    /// Applies one event to a file's state and broadcasts the change.
    pub fn apply(&self, file_id: Uuid, event: FileEvent) -> Option<StateChange> {
        let change = {
            let mut files = Self::lock(&self.inner.files);
            let state = files.get_mut(&file_id)?;
            state.apply(event)
        };
        self.emit(PipelineEvent::FileChanged(change.clone()));
        Some(change)
    }

    pub fn set_file_status(&self, file_id: Uuid, status: UploadStatus) {
        self.apply(file_id, FileEvent::StatusSet { status });
    }

    /// Snapshot of one file's state.
    pub fn file(&self, file_id: Uuid) -> Option<FileState> {
        Self::lock(&self.inner.files).get(&file_id).cloned()
    }

    pub fn file_count(&self) -> usize {
        Self::lock(&self.inner.files).len()
    }

    pub fn is_fully_uploaded(&self, file_id: Uuid) -> bool {
        Self::lock(&self.inner.files)
            .get(&file_id)
            .is_some_and(|s| s.is_fully_uploaded())
    }

    /// True when every non-errored file in the table is fully uploaded.
    /// The persistence consumer uses this as one of its flush triggers.
    pub fn all_active_complete(&self) -> bool {
        Self::lock(&self.inner.files)
            .values()
            .filter(|s| !s.status.is_error())
            .all(|s| s.is_fully_uploaded())
    }

    /// No files left in flight.
    pub fn is_drained(&self) -> bool {
        Self::lock(&self.inner.files).is_empty()
    }

    /// Removes a persisted file and announces it. When the last file
    /// leaves, the session reports drained and returns to idle.
    pub fn mark_file_saved(&self, file_id: Uuid) {
        let drained = {
            let mut files = Self::lock(&self.inner.files);
            files.remove(&file_id);
            files.is_empty()
        };
        self.emit(PipelineEvent::FileSaved { file_id });
        if drained {
            debug!("all files persisted, session drained");
            self.set_status(SessionStatus::Idle);
            self.emit(PipelineEvent::Drained);
        }
    }

    // ---- byte accounting ----

    pub fn set_pending_scan(&self, pending: usize) {
        Self::lock(&self.inner.counters).pending_scan = pending;
        self.emit_progress();
    }

    /// Feeds one cumulative progress report for an in-flight request.
    ///
    /// The delta joins the global uploaded total and is attributed to the
    /// request's fragment files proportionally to their share of the
    /// declared size.
    pub fn on_request_progress(&self, meta: &RequestMeta, cumulative: u64) {
        let delta = {
            let mut sent = Self::lock(&self.inner.request_sent);
            let last = sent.entry(meta.id).or_insert(0);
            if cumulative <= *last {
                return;
            }
            let delta = cumulative - *last;
            *last = cumulative;
            delta
        };

        Self::lock(&self.inner.counters).uploaded += delta;

        if meta.total_size > 0 {
            for (file_id, share) in &meta.fragment_shares {
                let attributed = share * delta / meta.total_size;
                if attributed > 0 {
                    self.apply(*file_id, FileEvent::BytesAttributed { delta: attributed });
                }
            }
        }
        self.emit_progress();
    }

    /// Rolls back a failed request's optimistic bytes: the global total
    /// drops by what was counted, each fragment file loses its
    /// proportional share, and every referenced file flips to retrying.
    pub fn rollback_request(&self, meta: &RequestMeta) {
        let sent = Self::lock(&self.inner.request_sent)
            .remove(&meta.id)
            .unwrap_or(0);

        {
            let mut counters = Self::lock(&self.inner.counters);
            counters.uploaded = counters.uploaded.saturating_sub(sent);
        }

        if sent > 0 && meta.total_size > 0 {
            for (file_id, share) in &meta.fragment_shares {
                let amount = share * sent / meta.total_size;
                if amount > 0 {
                    self.apply(*file_id, FileEvent::BytesRolledBack { amount });
                }
            }
        }
        for file_id in &meta.files {
            self.set_file_status(*file_id, UploadStatus::Retrying);
        }
        self.emit_progress();
    }

    /// Settles accounting when a request completes: any gap between the
    /// declared size and the observed wire bytes is credited evenly
    /// across the request's fragment files.
    ///
    /// The declared size includes cipher padding, so each file's credit is
    /// clamped to the plaintext bytes it can still absorb; padding never
    /// pushes a file, or the session, past 100%.
    pub fn finish_request(&self, meta: &RequestMeta) {
        let sent = Self::lock(&self.inner.request_sent)
            .remove(&meta.id)
            .unwrap_or(0);
        let shortfall = meta.total_size.saturating_sub(sent);
        if shortfall == 0 {
            return;
        }

        let fragment_files: Vec<Uuid> = {
            let mut seen = Vec::new();
            for (file_id, _) in &meta.fragment_shares {
                if !seen.contains(file_id) {
                    seen.push(*file_id);
                }
            }
            seen
        };
        let mut credited = 0u64;
        if !fragment_files.is_empty() {
            let per_file = shortfall / fragment_files.len() as u64;
            for file_id in fragment_files {
                let remaining = Self::lock(&self.inner.files)
                    .get(&file_id)
                    .map(|s| s.size.saturating_sub(s.uploaded_bytes))
                    .unwrap_or(0);
                let credit = per_file.min(remaining);
                if credit > 0 {
                    self.apply(file_id, FileEvent::BytesAttributed { delta: credit });
                    credited += credit;
                }
            }
        }
        if credited > 0 {
            Self::lock(&self.inner.counters).uploaded += credited;
        }
        self.emit_progress();
    }

    /// Current aggregate snapshot; computing it advances the estimator.
    pub fn snapshot(&self) -> SessionSnapshot {
        let (uploaded, total, pending_scan) = {
            let c = Self::lock(&self.inner.counters);
            (c.uploaded, c.total, c.pending_scan)
        };
        let (speed, eta) = {
            let mut est = Self::lock(&self.inner.estimator);
            let eta = est.estimate_remaining(total.saturating_sub(uploaded));
            (est.speed(), eta)
        };
        SessionSnapshot {
            status: self.status(),
            // Wire bytes can exceed the plaintext total (padding,
            // multipart framing); never report past 100%.
            bytes_uploaded: uploaded.min(total),
            bytes_total: total,
            speed,
            eta,
            file_count: self.file_count(),
            pending_scan,
        }
    }

    fn emit_progress(&self) {
        self.emit(PipelineEvent::Progress(self.snapshot()));
    }

    /// Warns and flips the session to error; used when a consumer loop
    /// dies unexpectedly instead of crashing silently.
    pub fn report_fatal(&self, stage: &str, message: &str) {
        warn!(stage, message, "pipeline stage failed");
        self.set_status(SessionStatus::Error);
    }

    /// Circuit breaker for repeated persistence failures: pauses the
    /// session so the user can intervene instead of hammering the
    /// backend.
    pub fn trip_breaker(&self) {
        warn!("persistence failing repeatedly, pausing session");
        self.set_status(SessionStatus::Paused);
        self.emit(PipelineEvent::BreakerTripped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraglift_protocol::EncryptionMethod;

    fn runtime_with_file(size: u64) -> (UploadRuntime, Uuid) {
        let rt = UploadRuntime::new();
        let state = FileState::new("f.bin", size, "", "root", EncryptionMethod::NotEncrypted);
        let id = state.id;
        rt.register_file(state);
        (rt, id)
    }

    fn meta(id: Uuid, file: Uuid, size: u64) -> RequestMeta {
        RequestMeta {
            id,
            total_size: size,
            files: vec![file],
            fragment_shares: vec![(file, size)],
        }
    }

    #[test]
    fn progress_accumulates_deltas() {
        let (rt, file) = runtime_with_file(1000);
        let m = meta(Uuid::new_v4(), file, 1000);

        rt.on_request_progress(&m, 300);
        rt.on_request_progress(&m, 700);
        // Stale cumulative values are ignored.
        rt.on_request_progress(&m, 600);

        let snap = rt.snapshot();
        assert_eq!(snap.bytes_uploaded, 700);
        assert_eq!(rt.file(file).unwrap().uploaded_bytes, 700);
    }

    #[test]
    fn rollback_then_retry_does_not_double_count() {
        let (rt, file) = runtime_with_file(1000);
        let request_id = Uuid::new_v4();
        let m = meta(request_id, file, 1000);

        rt.on_request_progress(&m, 400);
        rt.rollback_request(&m);
        assert_eq!(rt.snapshot().bytes_uploaded, 0);
        assert_eq!(rt.file(file).unwrap().status, UploadStatus::Retrying);

        // The retried request reports the full transfer.
        rt.on_request_progress(&m, 1000);
        rt.finish_request(&m);
        assert_eq!(rt.snapshot().bytes_uploaded, 1000);
        assert_eq!(rt.file(file).unwrap().uploaded_bytes, 1000);
    }

    #[test]
    fn shortfall_is_credited_on_finish() {
        let (rt, file) = runtime_with_file(1000);
        let m = meta(Uuid::new_v4(), file, 1000);

        rt.on_request_progress(&m, 900);
        rt.finish_request(&m);

        assert_eq!(rt.snapshot().bytes_uploaded, 1000);
        assert_eq!(rt.file(file).unwrap().uploaded_bytes, 1000);
    }

    #[test]
    fn padded_declaration_never_overshoots_file_size() {
        let (rt, file) = runtime_with_file(1000);
        // Declared request size is padded to the cipher block multiple.
        let m = RequestMeta {
            id: Uuid::new_v4(),
            total_size: 1024,
            files: vec![file],
            fragment_shares: vec![(file, 1000)],
        };

        rt.on_request_progress(&m, 1000);
        rt.finish_request(&m);

        let state = rt.file(file).unwrap();
        assert_eq!(state.uploaded_bytes, 1000);
        assert_eq!(state.progress, 100);
        let snap = rt.snapshot();
        assert_eq!(snap.bytes_uploaded, 1000);
        assert_eq!(snap.bytes_total, 1000);
    }

    #[test]
    fn progress_is_proportional_to_fragment_share() {
        let rt = UploadRuntime::new();
        let a = FileState::new("a", 600, "", "r", EncryptionMethod::NotEncrypted);
        let b = FileState::new("b", 400, "", "r", EncryptionMethod::NotEncrypted);
        let (ida, idb) = (a.id, b.id);
        rt.register_file(a);
        rt.register_file(b);

        let m = RequestMeta {
            id: Uuid::new_v4(),
            total_size: 1000,
            files: vec![ida, idb],
            fragment_shares: vec![(ida, 600), (idb, 400)],
        };
        rt.on_request_progress(&m, 500);

        assert_eq!(rt.file(ida).unwrap().uploaded_bytes, 300);
        assert_eq!(rt.file(idb).unwrap().uploaded_bytes, 200);
    }

    #[test]
    fn drain_returns_session_to_idle() {
        let (rt, file) = runtime_with_file(10);
        rt.set_status(SessionStatus::Uploading);
        let mut events = rt.subscribe();
        rt.mark_file_saved(file);
        assert!(rt.is_drained());
        assert_eq!(rt.status(), SessionStatus::Idle);

        let mut saw_drained = false;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, PipelineEvent::Drained) {
                saw_drained = true;
            }
        }
        assert!(saw_drained);
    }

    #[test]
    fn all_active_complete_skips_errored_files() {
        let rt = UploadRuntime::new();
        let mut good = FileState::new("g", 0, "", "r", EncryptionMethod::NotEncrypted);
        good.status = UploadStatus::WaitingForSave;
        let bad = FileState::new("b", 100, "", "r", EncryptionMethod::NotEncrypted);
        let bad_id = bad.id;
        rt.register_file(good);
        rt.register_file(bad);

        assert!(!rt.all_active_complete());
        rt.set_file_status(bad_id, UploadStatus::UploadFailed);
        assert!(rt.all_active_complete());
    }

    #[tokio::test]
    async fn wait_until_uploading_unblocks_on_status() {
        let rt = UploadRuntime::new();
        let rt2 = rt.clone();
        let waiter = tokio::spawn(async move { rt2.wait_until_uploading().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        rt.set_status(SessionStatus::Uploading);
        waiter.await.unwrap();
    }
}
