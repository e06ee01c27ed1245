//! End-to-end pipeline tests against mock host and backend services.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fraglift_host::{BackendApi, HostError, HostTransport, ProgressFn};
use fraglift_pipeline::{
    NoThumbnails, PipelineEvent, SessionConfig, SessionStatus, UploadSession,
};
use fraglift_protocol::{
    CreateFileBatch, CreateFolderRequest, CreateFolderResponse, EncryptionMethod, FileRecord,
    HostAttachment, HostAuthor, HostLimits, HostMessage, RegisterAttachmentsBatch,
};
use tokio_util::sync::CancellationToken;

fn round_up_to_64(n: u64) -> u64 {
    n.div_ceil(64) * 64
}

/// Mock host that asserts every request respects the configured caps and
/// fabricates message/attachment ids.
struct MockHost {
    limits: HostLimits,
    counter: AtomicU64,
    fail_connectivity_once: AtomicBool,
    stall_once: AtomicBool,
    /// Part sizes of each accepted request.
    requests: Mutex<Vec<Vec<usize>>>,
}

impl MockHost {
    fn new(limits: HostLimits) -> Self {
        Self {
            limits,
            counter: AtomicU64::new(0),
            fail_connectivity_once: AtomicBool::new(false),
            stall_once: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HostTransport for MockHost {
    async fn upload(
        &self,
        parts: Vec<Bytes>,
        _filename: &str,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<HostMessage, HostError> {
        assert!(parts.len() <= self.limits.max_attachments, "too many parts");
        let padded: u64 = parts.iter().map(|p| round_up_to_64(p.len() as u64)).sum();
        assert!(
            padded <= self.limits.max_payload_size,
            "request exceeds payload cap: {padded}"
        );
        let total: u64 = parts.iter().map(|p| p.len() as u64).sum();

        if self.stall_once.swap(false, Ordering::SeqCst) {
            // Hangs until cancelled, like a transfer cut off by pause.
            cancel.cancelled().await;
            return Err(HostError::Cancelled);
        }
        if self.fail_connectivity_once.swap(false, Ordering::SeqCst) {
            // Half the bytes made it out before the link dropped.
            progress(total / 2);
            return Err(HostError::Connectivity("link down".into()));
        }
        progress(total);

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push(parts.iter().map(Bytes::len).collect());
        Ok(HostMessage {
            id: format!("msg-{n}"),
            channel_id: "chan-1".into(),
            author: HostAuthor { id: "bot".into() },
            attachments: (0..parts.len())
                .map(|i| HostAttachment {
                    id: format!("att-{n}-{i}"),
                    filename: "blob".into(),
                    size: parts[i].len() as u64,
                })
                .collect(),
        })
    }
}

#[derive(Default)]
struct MockBackend {
    folders: Mutex<Vec<CreateFolderRequest>>,
    file_batches: Mutex<Vec<CreateFileBatch>>,
    references: Mutex<Vec<RegisterAttachmentsBatch>>,
}

impl MockBackend {
    fn records(&self) -> Vec<FileRecord> {
        self.file_batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.files.clone())
            .collect()
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn create_folder(
        &self,
        request: &CreateFolderRequest,
    ) -> Result<CreateFolderResponse, HostError> {
        let mut folders = self.folders.lock().unwrap();
        folders.push(request.clone());
        Ok(CreateFolderResponse {
            id: format!("folder-{}", folders.len()),
        })
    }

    async fn create_files(&self, batch: &CreateFileBatch) -> Result<(), HostError> {
        self.file_batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn register_attachments(
        &self,
        batch: &RegisterAttachmentsBatch,
    ) -> Result<(), HostError> {
        self.references.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn probe(&self) -> bool {
        true
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

async fn wait_for_drain(
    events: &mut tokio::sync::broadcast::Receiver<PipelineEvent>,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::Drained) => return,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(err) => panic!("event stream ended early: {err}"),
            }
        }
    })
    .await
    .expect("session did not drain in time");
}

#[tokio::test]
async fn end_to_end_fragments_persist_and_register() {
    let dir = tempfile::tempdir().unwrap();
    let a_bytes = patterned(3000);
    let b_bytes = patterned(500);
    write_file(&dir.path().join("a.bin"), &a_bytes);
    write_file(&dir.path().join("sub/b.bin"), &b_bytes);
    write_file(&dir.path().join("sub/c.bin"), &b_bytes);
    write_file(&dir.path().join("empty.bin"), &[]);

    let limits = HostLimits {
        max_payload_size: 2500,
        max_attachments: 4,
    };
    let mut config = SessionConfig::new(limits, "root-folder");
    config.concurrency = 2;
    config.encryption_method = EncryptionMethod::ChaCha20;
    config
        .resource_passwords
        .insert("root-folder".into(), "hunter2".into());

    let host = Arc::new(MockHost::new(limits));
    let backend = Arc::new(MockBackend::default());
    let session = UploadSession::new(
        config,
        host.clone(),
        backend.clone(),
        Arc::new(NoThumbnails),
    );
    let mut events = session.events();

    session.start(vec![dir.path().to_path_buf()]).unwrap();
    wait_for_drain(&mut events).await;
    session.shutdown().await;

    let records = backend.records();
    assert_eq!(records.len(), 4);

    let record = |name: &str| {
        records
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no record for {name}"))
            .clone()
    };

    // Fragments partition the file exactly, in sequence order.
    let a = record("a.bin");
    let total: u64 = a.fragments.iter().map(|f| f.fragment_size).sum();
    assert_eq!(total, 3000);
    let mut expected_offset = 0;
    for (i, fragment) in a.fragments.iter().enumerate() {
        assert_eq!(fragment.fragment_sequence as usize, i + 1);
        assert_eq!(fragment.offset, expected_offset);
        expected_offset += fragment.fragment_size;
    }
    assert_eq!(a.crc, crc32fast::hash(&a_bytes));
    assert!(a.iv.is_some() && a.key.is_some());

    // Files sharing a directory share one created folder.
    let folders = backend.folders.lock().unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].name, "sub");
    assert_eq!(folders[0].parent_id, "root-folder");
    assert_eq!(record("b.bin").parent_id, "folder-1");
    assert_eq!(record("c.bin").parent_id, "folder-1");
    assert_eq!(a.parent_id, "root-folder");

    // Zero-byte files persist without ever touching the host.
    let empty = record("empty.bin");
    assert!(empty.fragments.is_empty());
    assert_eq!(empty.size, 0);

    // Passwords ride along with every persistence batch.
    let batches = backend.file_batches.lock().unwrap();
    assert!(
        batches
            .iter()
            .all(|b| b.resource_passwords.get("root-folder").is_some())
    );

    // Every uploaded fragment was registered as a reference after save.
    let references = backend.references.lock().unwrap();
    let fragment_refs: usize = references
        .iter()
        .map(|b| b.attachments.len())
        .sum();
    let fragment_count: usize = records.iter().map(|r| r.fragments.len()).sum();
    assert_eq!(fragment_refs, fragment_count);

    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn oversized_file_splits_into_two_capped_fragments() {
    // A file just over the payload cap must not produce a third sliver
    // from padding overflow.
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("big.bin"), &patterned(3000));

    let limits = HostLimits {
        max_payload_size: 2500,
        max_attachments: 10,
    };
    let mut config = SessionConfig::new(limits, "root");
    config.concurrency = 1;

    let host = Arc::new(MockHost::new(limits));
    let backend = Arc::new(MockBackend::default());
    let session = UploadSession::new(
        config,
        host.clone(),
        backend.clone(),
        Arc::new(NoThumbnails),
    );
    let mut events = session.events();
    session.start(vec![dir.path().to_path_buf()]).unwrap();
    wait_for_drain(&mut events).await;
    session.shutdown().await;

    let records = backend.records();
    assert_eq!(records[0].fragments.len(), 2);
    assert_eq!(
        records[0]
            .fragments
            .iter()
            .map(|f| f.fragment_size)
            .sum::<u64>(),
        3000
    );
}

#[tokio::test]
async fn connectivity_outage_retries_without_double_counting() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("f.bin"), &patterned(1000));

    let limits = HostLimits {
        max_payload_size: 2500,
        max_attachments: 4,
    };
    let mut config = SessionConfig::new(limits, "root");
    config.concurrency = 1;
    config.probe_interval = Duration::from_millis(50);
    config.encryption_method = EncryptionMethod::NotEncrypted;

    let host = Arc::new(MockHost::new(limits));
    host.fail_connectivity_once.store(true, Ordering::SeqCst);
    let backend = Arc::new(MockBackend::default());
    let session = UploadSession::new(
        config,
        host.clone(),
        backend.clone(),
        Arc::new(NoThumbnails),
    );
    let mut events = session.events();
    session.start(vec![dir.path().to_path_buf()]).unwrap();
    wait_for_drain(&mut events).await;

    // The half-sent bytes of the failed attempt were rolled back; only
    // the successful attempt counts. Padding in the declared request size
    // is clamped away, so completion settles exactly at the file size.
    let snapshot = session.snapshot();
    assert_eq!(snapshot.bytes_uploaded, 1000);
    assert_eq!(snapshot.bytes_total, 1000);
    assert_eq!(host.requests.lock().unwrap().len(), 1);

    let records = backend.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fragments.len(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let limits = HostLimits {
        max_payload_size: 2500,
        max_attachments: 4,
    };
    let dir = tempfile::tempdir().unwrap();
    let session = UploadSession::new(
        SessionConfig::new(limits, "root"),
        Arc::new(MockHost::new(limits)),
        Arc::new(MockBackend::default()),
        Arc::new(NoThumbnails),
    );
    session.start(vec![dir.path().to_path_buf()]).unwrap();
    assert!(session.start(vec![dir.path().to_path_buf()]).is_err());
    session.shutdown().await;
}

#[tokio::test]
async fn pause_flips_status_and_resume_recovers() {
    let limits = HostLimits {
        max_payload_size: 2500,
        max_attachments: 4,
    };
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("f.bin"), &patterned(200));

    let host = Arc::new(MockHost::new(limits));
    host.stall_once.store(true, Ordering::SeqCst);
    let backend = Arc::new(MockBackend::default());
    let session = UploadSession::new(
        SessionConfig::new(limits, "root"),
        host,
        backend.clone(),
        Arc::new(NoThumbnails),
    );
    let mut events = session.events();

    session.start(vec![dir.path().to_path_buf()]).unwrap();
    // Let the first transfer get stuck in flight before pausing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.pause();
    assert_eq!(session.status(), SessionStatus::Paused);

    session.resume();
    assert_eq!(session.status(), SessionStatus::Uploading);
    wait_for_drain(&mut events).await;
    session.shutdown().await;

    assert_eq!(backend.records().len(), 1);
}
