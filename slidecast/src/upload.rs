//! Document upload
//!
//! The presentation is posted once, as a multipart form, before streaming
//! starts. Only `.pptx` files are accepted and the check happens before any
//! request is made.

use crate::config::{RelayConfig, UploadConfig};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use slidecast_core::{RelayError, RelayResult};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const GENERIC_FAILURE: &str = "Upload failed";

/// Successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Message returned by the service
    pub message: String,
}

/// Sends a presentation to the processing service
#[async_trait]
pub trait DocumentUploader: Send + Sync {
    /// Upload the document at `path`
    async fn upload(&self, path: &Path) -> RelayResult<UploadReceipt>;
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    message: Option<String>,
    error: Option<String>,
}

/// HTTP uploader
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    url: Url,
    config: UploadConfig,
}

impl UploadClient {
    /// Uploader for the configured endpoint
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let url = config.upload_url()?;
        let http = reqwest::Client::builder()
            .timeout(config.upload.timeout)
            .build()
            .map_err(|e| RelayError::InvalidConfiguration {
                field: "upload".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            url,
            config: config.upload.clone(),
        })
    }

    /// Upload route
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Reject files without the accepted extension
    pub fn check_extension(&self, path: &Path) -> RelayResult<()> {
        let accepted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.config.extension))
            .unwrap_or(false);
        if accepted {
            Ok(())
        } else {
            Err(RelayError::Upload {
                reason: format!(
                    "Please select a PowerPoint ({}) file",
                    self.config.extension.to_uppercase()
                ),
            })
        }
    }
}

#[async_trait]
impl DocumentUploader for UploadClient {
    async fn upload(&self, path: &Path) -> RelayResult<UploadReceipt> {
        self.check_extension(path)?;

        let bytes = tokio::fs::read(path).await.map_err(|e| RelayError::Upload {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("presentation.{}", self.config.extension));

        debug!(url = %self.url, bytes = bytes.len(), "Uploading {}", file_name);

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(PPTX_MIME)
            .map_err(|e| RelayError::Upload {
                reason: e.to_string(),
            })?;
        let form = Form::new().part(self.config.field_name.clone(), part);

        let response = self
            .http
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::Upload {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| RelayError::Upload {
            reason: e.to_string(),
        })?;
        interpret_response(status, &body)
    }
}

fn interpret_response(status: StatusCode, body: &[u8]) -> RelayResult<UploadReceipt> {
    let parsed = serde_json::from_slice::<UploadResponse>(body);

    if status.is_success() {
        match parsed {
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Upload succeeded".to_string());
                info!("Document uploaded: {}", message);
                Ok(UploadReceipt { message })
            }
            Err(e) => Err(RelayError::Upload {
                reason: format!("unreadable response: {}", e),
            }),
        }
    } else {
        let reason = parsed
            .ok()
            .and_then(|response| response.error)
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());
        warn!(status = status.as_u16(), "Upload rejected: {}", reason);
        Err(RelayError::Upload { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn client() -> UploadClient {
        UploadClient::new(&RelayConfig::default()).unwrap()
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        let client = client();
        assert!(client.check_extension(&PathBuf::from("deck.pptx")).is_ok());
        assert!(client.check_extension(&PathBuf::from("DECK.PPTX")).is_ok());
        assert!(client.check_extension(&PathBuf::from("deck.pdf")).is_err());
        assert!(client.check_extension(&PathBuf::from("deck")).is_err());
    }

    #[tokio::test]
    async fn test_wrong_extension_makes_no_request() {
        let config = RelayConfig::for_endpoint("http://127.0.0.1:9");
        let client = UploadClient::new(&config).unwrap();

        let error = client
            .upload(&PathBuf::from("/nonexistent/notes.txt"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("PowerPoint"));
    }

    #[test]
    fn test_server_error_text_is_used() {
        let error =
            interpret_response(StatusCode::BAD_REQUEST, br#"{"error":"File must be a pptx"}"#)
                .unwrap_err();
        assert_eq!(error.to_string(), "Upload failed: File must be a pptx");

        let error = interpret_response(StatusCode::INTERNAL_SERVER_ERROR, b"oops").unwrap_err();
        assert_eq!(error.to_string(), "Upload failed: Upload failed");
    }

    #[test]
    fn test_success_message() {
        let receipt =
            interpret_response(StatusCode::OK, br#"{"message":"pptx loaded successfully"}"#)
                .unwrap();
        assert_eq!(receipt.message, "pptx loaded successfully");
    }
}
