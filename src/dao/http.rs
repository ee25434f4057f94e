//! Shared HTTP plumbing for the platform collaborators.

use std::sync::Arc;

use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Convenient result alias returning [`ApiError`] failures.
pub type ApiResult<T> = Result<T, ApiError>;

/// Failures that can occur while talking to the HTTP collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build HTTP client")]
    ClientBuilder {
        /// Underlying failure.
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send request to `{path}`")]
    RequestSend {
        /// Request path.
        path: String,
        /// Underlying failure.
        #[source]
        source: reqwest::Error,
    },
    /// The collaborator returned an unexpected status code.
    #[error("unexpected response status {status} for `{path}`")]
    RequestStatus {
        /// Request path.
        path: String,
        /// Returned status.
        status: StatusCode,
    },
    /// Response payload could not be parsed.
    #[error("failed to decode response for `{path}`")]
    DecodeResponse {
        /// Request path.
        path: String,
        /// Underlying failure.
        #[source]
        source: reqwest::Error,
    },
    /// The addressed resource does not exist.
    #[error("resource `{path}` not found")]
    NotFound {
        /// Request path.
        path: String,
    },
}

/// Thin wrapper over one collaborator base URL.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
}

impl ApiClient {
    /// Build a client for the given base URL.
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| ApiError::ClientBuilder { source })?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client.request(method, url)
    }

    /// GET a JSON payload.
    pub async fn get_json<T>(&self, path: &str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|source| ApiError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound {
                path: path.to_string(),
            }),
            status if status.is_success() => {
                response
                    .json::<T>()
                    .await
                    .map_err(|source| ApiError::DecodeResponse {
                        path: path.to_string(),
                        source,
                    })
            }
            other => Err(ApiError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ApiError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    /// PATCH a JSON body, expecting no payload back.
    pub async fn patch_json<B>(&self, path: &str, body: &B) -> ApiResult<()>
    where
        B: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PATCH, path)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            })
        }
    }

    /// POST raw bytes (attachment upload) and decode the JSON response.
    pub async fn post_bytes<T>(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::POST, path)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|source| ApiError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ApiError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }
}
