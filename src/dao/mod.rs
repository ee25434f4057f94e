/// Question-bank fetch and grab endpoints.
pub mod bank;
/// Shared HTTP plumbing for the collaborators.
pub mod http;
/// Local persisted session store.
pub mod local;
/// Tabular-record endpoints.
pub mod sheets;
/// Attachment upload endpoint.
pub mod uploads;

use crate::dao::bank::QuestionBankClient;
use crate::dao::http::{ApiClient, ApiResult};
use crate::dao::sheets::SheetsClient;
use crate::dao::uploads::UploadClient;

/// Bundle of the HTTP collaborators, cloned into every service that needs
/// network access.
#[derive(Clone)]
pub struct Collaborators {
    /// Question-bank endpoints.
    pub bank: QuestionBankClient,
    /// Tabular-record endpoints.
    pub sheets: SheetsClient,
    /// Attachment upload endpoint.
    pub uploads: UploadClient,
}

impl Collaborators {
    /// Build every collaborator client over one base URL.
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let api = ApiClient::new(base_url)?;
        Ok(Self {
            bank: QuestionBankClient::new(api.clone()),
            sheets: SheetsClient::new(api.clone()),
            uploads: UploadClient::new(api),
        })
    }
}
