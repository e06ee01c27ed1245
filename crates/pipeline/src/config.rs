//! Session configuration.

use std::collections::HashMap;
use std::time::Duration;

use fraglift_protocol::{EncryptionMethod, HostLimits};

/// Everything a session needs to know up front. Host limits come from
/// backend configuration, never hard-coded.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub limits: HostLimits,
    /// Target number of concurrent upload consumers; adjustable live.
    pub concurrency: usize,
    /// Opaque filename every uploaded attachment is stored under.
    pub attachment_name: String,
    /// Destination folder id files without a relative path land in.
    pub folder_context: String,
    pub encryption_method: EncryptionMethod,
    /// Passwords authorizing protected destination folders, keyed by the
    /// folder the lock originates from. Sent with persistence batches.
    pub resource_passwords: HashMap<String, String>,
    /// Period of the connectivity probe while offline.
    pub probe_interval: Duration,
    /// Capacity of the producer's input queue.
    pub file_queue_capacity: usize,
    /// Capacity of the request queue feeding upload consumers.
    pub request_queue_capacity: usize,
    /// Files delivered per scanner message.
    pub scan_batch_size: usize,
}

impl SessionConfig {
    pub fn new(limits: HostLimits, folder_context: impl Into<String>) -> Self {
        Self {
            limits,
            concurrency: 4,
            attachment_name: "blob".into(),
            folder_context: folder_context.into(),
            encryption_method: EncryptionMethod::ChaCha20,
            resource_passwords: HashMap::new(),
            probe_interval: Duration::from_secs(5),
            file_queue_capacity: 16,
            request_queue_capacity: 8,
            scan_batch_size: 64,
        }
    }
}
