//! Incremental directory scanning feeding the pipeline.
//!
//! The walk itself is blocking filesystem work, so it runs on a worker
//! task and delivers entries over a queue in discrete batches. The
//! receiving side signals `more` when it wants the next batch, keeping
//! the scan lazy for large trees.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::BoundedQueue;
use crate::types::UploadEntry;

/// Scans `root` recursively into upload entries with `/`-separated
/// relative directory paths. Returns the entries and their total size.
pub fn scan_upload_entries(root: &Path) -> std::io::Result<(Vec<UploadEntry>, u64)> {
    let mut entries = Vec::new();
    let mut total = 0u64;
    walk_dir(root, root, &mut entries, &mut total)?;
    Ok((entries, total))
}

fn walk_dir(
    root: &Path,
    current: &Path,
    out: &mut Vec<UploadEntry>,
    total: &mut u64,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, out, total)?;
        } else if metadata.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let parent = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();

            out.push(UploadEntry {
                name,
                size: metadata.len(),
                relative_path: parent,
                path,
            });
            *total += metadata.len();
        }
    }
    Ok(())
}

/// Spawns the scan worker: walks `roots`, then delivers entries over
/// `out` in batches of `batch_size`, waiting for a `more` signal between
/// batches. Closes `out` when the tree is exhausted.
pub fn spawn_scanner(
    roots: Vec<PathBuf>,
    batch_size: usize,
    out: BoundedQueue<Vec<UploadEntry>>,
    mut more: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let scanned = tokio::task::spawn_blocking(move || {
            let mut all = Vec::new();
            let mut total = 0u64;
            for root in &roots {
                if root.is_file() {
                    if let Ok(metadata) = std::fs::metadata(root) {
                        all.push(UploadEntry {
                            name: root
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            size: metadata.len(),
                            relative_path: String::new(),
                            path: root.clone(),
                        });
                        total += metadata.len();
                    }
                    continue;
                }
                match scan_upload_entries(root) {
                    Ok((entries, size)) => {
                        all.extend(entries);
                        total += size;
                    }
                    Err(err) => warn!(root = %root.display(), %err, "scan failed"),
                }
            }
            (all, total)
        })
        .await;

        let (entries, total) = match scanned {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "scan worker panicked");
                out.close();
                return;
            }
        };
        debug!(files = entries.len(), total_bytes = total, "scan complete");

        let mut batches = entries.chunks(batch_size.max(1));
        loop {
            // One batch per request keeps registration incremental.
            if more.recv().await.is_none() {
                break;
            }
            match batches.next() {
                Some(batch) => {
                    if out.put(batch.to_vec()).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
        out.close();
    })
}
