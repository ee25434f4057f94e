//! Attachment-upload collaborator. The drawing surface renders an image; the
//! returned opaque token is submitted as a fill-in answer value.

use serde::Deserialize;

use crate::dao::http::{ApiClient, ApiResult};

/// Client for the attachment endpoint.
#[derive(Clone)]
pub struct UploadClient {
    api: ApiClient,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    token: String,
}

impl UploadClient {
    /// Client over the shared API plumbing.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Upload a rendered image, returning the opaque token to submit as an
    /// answer value.
    pub async fn upload_image(&self, bytes: Vec<u8>) -> ApiResult<String> {
        let response: UploadResponse = self
            .api
            .post_bytes("attachments", bytes, "image/png")
            .await?;
        Ok(response.token)
    }
}
