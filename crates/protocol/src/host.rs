use serde::{Deserialize, Serialize};

/// One entry of the `json_payload` attachment manifest sent alongside the
/// multipart file parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: usize,
    pub filename: String,
}

/// The `json_payload` part of a host upload request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentManifest {
    pub attachments: Vec<ManifestEntry>,
}

impl AttachmentManifest {
    /// Builds a manifest for `count` attachments, all sharing one opaque
    /// filename.
    pub fn uniform(count: usize, filename: &str) -> Self {
        Self {
            attachments: (0..count)
                .map(|id| ManifestEntry {
                    id,
                    filename: filename.to_string(),
                })
                .collect(),
        }
    }
}

/// Host-assigned identity of one stored attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAttachment {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
}

/// Author of a host message; only the id is meaningful to us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAuthor {
    pub id: String,
}

/// Response to a successful host upload: one message holding all the
/// attachments of the request, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMessage {
    pub id: String,
    pub channel_id: String,
    pub author: HostAuthor,
    pub attachments: Vec<HostAttachment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_uniform_indices() {
        let m = AttachmentManifest::uniform(3, "blob");
        assert_eq!(m.attachments.len(), 3);
        assert_eq!(m.attachments[0].id, 0);
        assert_eq!(m.attachments[2].id, 2);
        assert!(m.attachments.iter().all(|e| e.filename == "blob"));
    }

    #[test]
    fn host_message_deserializes() {
        let json = r#"{
            "id": "m1",
            "channel_id": "c1",
            "author": { "id": "a1" },
            "attachments": [
                { "id": "att1", "filename": "blob" },
                { "id": "att2", "filename": "blob", "size": 42 }
            ]
        }"#;
        let msg: HostMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0].size, 0);
        assert_eq!(msg.attachments[1].size, 42);
    }
}
