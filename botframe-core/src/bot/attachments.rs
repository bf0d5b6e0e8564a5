//! Attachment upload to the storage collaborator
//!
//! An upload names its source in exactly one of two forms: a URL the
//! storage side fetches itself, or raw bytes with a filename. The spec
//! is validated before any network traffic happens.

use std::time::Duration;

use tracing::{debug, warn};

use crate::bot::error::DispatchError;
use crate::protocol::AttachmentUploadResponse;

const UPLOAD_TRIES: u32 = 2;
const UPLOAD_BACKOFF: Duration = Duration::from_millis(500);

/// Source material for one attachment upload
#[derive(Debug, Clone, Default)]
pub struct UploadSpec {
    pub download_url: Option<String>,
    pub file_data: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Request an inline reference for embedding in markdown output
    pub is_inline: bool,
}

impl UploadSpec {
    /// Upload by handing the storage side a URL to fetch
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            download_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Upload raw bytes under the given filename
    pub fn from_bytes(data: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            file_data: Some(data),
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn inline(mut self) -> Self {
        self.is_inline = true;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Exactly one source form must be present, and the bytes form
    /// requires a filename.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match (&self.download_url, &self.file_data) {
            (Some(_), Some(_)) => Err(DispatchError::InvalidAttachmentSpec(
                "provide a download URL or file data, not both".to_string(),
            )),
            (None, None) => Err(DispatchError::InvalidAttachmentSpec(
                "provide a download URL or file data".to_string(),
            )),
            (None, Some(_)) if self.filename.is_none() => Err(
                DispatchError::InvalidAttachmentSpec("file data requires a filename".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Post one upload to the storage endpoint, retrying once on failure.
pub(crate) async fn upload(
    client: &reqwest::Client,
    endpoint: &str,
    access_key: &str,
    spec: &UploadSpec,
) -> Result<AttachmentUploadResponse, DispatchError> {
    spec.validate()?;
    if endpoint.is_empty() {
        return Err(DispatchError::AttachmentUploadFailed(
            "no attachment endpoint configured".to_string(),
        ));
    }

    let mut last_error = String::new();
    for attempt in 1..=UPLOAD_TRIES {
        match post_once(client, endpoint, access_key, spec).await {
            Ok(response) => {
                debug!(attempt, "attachment upload accepted");
                return Ok(response);
            }
            Err(error) => {
                warn!(attempt, %error, "attachment upload attempt failed");
                last_error = error;
                if attempt < UPLOAD_TRIES {
                    tokio::time::sleep(UPLOAD_BACKOFF).await;
                }
            }
        }
    }
    Err(DispatchError::AttachmentUploadFailed(last_error))
}

async fn post_once(
    client: &reqwest::Client,
    endpoint: &str,
    access_key: &str,
    spec: &UploadSpec,
) -> Result<AttachmentUploadResponse, String> {
    let mut form = reqwest::multipart::Form::new();
    if let Some(url) = &spec.download_url {
        form = form.text("download_url", url.clone());
    }
    if let Some(data) = &spec.file_data {
        let filename = spec.filename.clone().unwrap_or_default();
        let mut part = reqwest::multipart::Part::bytes(data.clone()).file_name(filename);
        if let Some(content_type) = &spec.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| format!("invalid content type: {e}"))?;
        }
        form = form.part("file", part);
    }
    if spec.is_inline {
        form = form.text("is_inline", "true");
    }

    let response = client
        .post(endpoint)
        .header("Authorization", access_key)
        .multipart(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("storage endpoint returned {status}: {body}"));
    }
    response
        .json::<AttachmentUploadResponse>()
        .await
        .map_err(|e| format!("malformed upload response: {e}"))
}
