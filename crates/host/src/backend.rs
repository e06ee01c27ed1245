//! JSON client for the metadata backend.

use std::time::Duration;

use async_trait::async_trait;
use fraglift_protocol::{
    CreateFileBatch, CreateFolderRequest, CreateFolderResponse, RegisterAttachmentsBatch,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HostError;
use crate::traits::BackendApi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Folder creation retries transient failures a few times before giving
/// up; the producer cannot make progress on the file without the folder.
const FOLDER_CREATE_ATTEMPTS: u32 = 3;
const FOLDER_CREATE_BACKOFF: Duration = Duration::from_secs(1);

/// Reqwest-backed [`BackendApi`].
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, HostError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {token}"));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HostError::from_status(status.as_u16(), None, message));
        }
        Ok(response)
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn create_folder(
        &self,
        request: &CreateFolderRequest,
    ) -> Result<CreateFolderResponse, HostError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_json("/folders", request).await {
                Ok(response) => {
                    let created: CreateFolderResponse = response
                        .json()
                        .await
                        .map_err(|e| HostError::Decode(e.to_string()))?;
                    debug!(folder = %created.id, name = %request.name, "folder created");
                    return Ok(created);
                }
                Err(err @ (HostError::Connectivity(_) | HostError::Server { .. }))
                    if attempt < FOLDER_CREATE_ATTEMPTS =>
                {
                    warn!(name = %request.name, attempt, error = %err, "folder create retry");
                    tokio::time::sleep(FOLDER_CREATE_BACKOFF).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn create_files(&self, batch: &CreateFileBatch) -> Result<(), HostError> {
        debug!(files = batch.files.len(), "registering file batch");
        self.post_json("/files", batch).await?;
        Ok(())
    }

    async fn register_attachments(
        &self,
        batch: &RegisterAttachmentsBatch,
    ) -> Result<(), HostError> {
        debug!(
            kind = ?batch.kind,
            attachments = batch.attachments.len(),
            "registering attachment references"
        );
        self.post_json("/attachments", batch).await?;
        Ok(())
    }

    async fn probe(&self) -> bool {
        // Any HTTP response means the backend is reachable; only transport
        // failures count as offline.
        self.client.get(self.url("/health")).send().await.is_ok()
    }
}
