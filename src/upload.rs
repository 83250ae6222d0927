//! File upload through the hub's storage proxy.
//!
//! An upload is three steps that always run in order: ask the hub for storage
//! credentials, put the blob, tell the hub how the put went. The hub is notified even when
//! the put fails so it can release the correlation id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IoTHubError;

/// Body uploaded when no file is given
pub const DEFAULT_CONTENT: &[u8] = b"Hello, World!";

/// Status reported to the hub when the blob was stored
const UPLOAD_SUCCEEDED: i32 = 200;
/// Status reported when the failure carried no http status
const UPLOAD_FAILED: i32 = -1;

/// Storage credentials the hub hands out for one upload
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    ///
    pub correlation_id: String,
    ///
    pub host_name: String,
    ///
    pub container_name: String,
    ///
    pub blob_name: String,
    /// Query string starting with `?`
    pub sas_token: String,
}

impl StorageInfo {
    /// Url of the blob, authorised by the SAS token
    pub fn blob_url(&self) -> String {
        format!(
            "https://{}/{}/{}{}",
            self.host_name, self.container_name, self.blob_name, self.sas_token
        )
    }
}

/// Outcome of an upload as reported back to the hub
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadNotification {
    ///
    pub correlation_id: String,
    ///
    pub is_success: bool,
    ///
    pub status_code: i32,
    ///
    pub status_description: String,
}

/// The hub side of an upload
#[async_trait]
pub trait FileUploadTransport: Send {
    ///
    async fn get_storage_info_for_blob(&mut self, blob_name: &str) -> crate::Result<StorageInfo>;
    ///
    async fn notify_blob_upload_status(
        &mut self,
        notification: &UploadNotification,
    ) -> crate::Result<()>;
}

/// Where the bytes go
#[async_trait]
pub trait BlobStorage: Send + Sync {
    ///
    async fn upload(&self, info: &StorageInfo, content: Vec<u8>) -> crate::Result<()>;
}

/// Blob name of the form `quickstart-{uuid}.txt`
pub fn default_blob_name() -> String {
    format!("quickstart-{}.txt", uuid::Uuid::new_v4())
}

fn failure_status(error: &IoTHubError) -> i32 {
    match error {
        IoTHubError::ServiceResponse { status, .. } => i32::from(*status),
        _ => UPLOAD_FAILED,
    }
}

/// Upload `content` as `blob_name` and report the outcome to the hub.
///
/// A failed put still notifies the hub, then returns [`IoTHubError::UploadFailed`].
pub async fn upload_file<U, B>(
    uploader: &mut U,
    storage: &B,
    blob_name: &str,
    content: Vec<u8>,
) -> crate::Result<UploadNotification>
where
    U: FileUploadTransport + ?Sized,
    B: BlobStorage + ?Sized,
{
    let info = uploader.get_storage_info_for_blob(blob_name).await?;

    info!("uploading to azure storage as blob: {}", info.blob_name);
    let notification = match storage.upload(&info, content).await {
        Ok(()) => UploadNotification {
            correlation_id: info.correlation_id.clone(),
            is_success: true,
            status_code: UPLOAD_SUCCEEDED,
            status_description: String::new(),
        },
        Err(e) => {
            error!("storage blob upload failed: {}", e);
            UploadNotification {
                correlation_id: info.correlation_id.clone(),
                is_success: false,
                status_code: failure_status(&e),
                status_description: format!("Storage Blob Upload Error: {}", e),
            }
        }
    };

    let notified = uploader.notify_blob_upload_status(&notification).await;
    if notification.is_success {
        notified?;
        info!("upload of {} complete", info.blob_name);
        return Ok(notification);
    }

    if let Err(e) = notified {
        error!("could not notify the hub of the failed upload: {}", e);
    }
    Err(IoTHubError::UploadFailed {
        status: notification.status_code,
        description: notification.status_description,
    })
}

#[cfg(feature = "with-http")]
pub use self::http::{HttpBlobStorage, HttpFileUpload};

#[cfg(feature = "with-http")]
mod http {
    use async_trait::async_trait;
    use hyper::header::{self, HeaderName};
    use hyper::{Body, Method};
    use serde_json::json;

    use super::{BlobStorage, FileUploadTransport, StorageInfo, UploadNotification};
    use crate::http_transport::{authorization, ensure_success, HttpTransport, API_VERSION};
    use crate::token::{url_encode, DeviceConnectionString, DeviceKeyTokenSource};

    /// The device's file upload endpoints on the hub
    #[derive(Debug, Clone)]
    pub struct HttpFileUpload {
        host_name: String,
        device_id: String,
        token_source: DeviceKeyTokenSource,
        http: HttpTransport,
    }

    impl HttpFileUpload {
        ///
        pub fn new(connection: &DeviceConnectionString) -> Self {
            Self {
                host_name: connection.host_name.clone(),
                device_id: connection.device_id.clone(),
                token_source: connection.token_source(),
                http: HttpTransport::new(),
            }
        }

        fn files_url(&self, suffix: &str) -> String {
            format!(
                "https://{}/devices/{}/files{}?api-version={}",
                self.host_name,
                url_encode(&self.device_id),
                suffix,
                API_VERSION
            )
        }
    }

    #[async_trait]
    impl FileUploadTransport for HttpFileUpload {
        async fn get_storage_info_for_blob(
            &mut self,
            blob_name: &str,
        ) -> crate::Result<StorageInfo> {
            let body = self
                .http
                .send_json(
                    Method::POST,
                    &self.files_url(""),
                    authorization(&self.token_source)?,
                    vec![],
                    Some(&json!({ "blobName": blob_name })),
                )
                .await?;
            Ok(serde_json::from_slice(&body)?)
        }

        async fn notify_blob_upload_status(
            &mut self,
            notification: &UploadNotification,
        ) -> crate::Result<()> {
            self.http
                .send_json(
                    Method::POST,
                    &self.files_url("/notifications"),
                    authorization(&self.token_source)?,
                    vec![],
                    Some(notification),
                )
                .await?;
            Ok(())
        }
    }

    /// Puts block blobs with the SAS credentials from [`StorageInfo`]
    #[derive(Debug, Clone)]
    pub struct HttpBlobStorage {
        http: HttpTransport,
    }

    impl HttpBlobStorage {
        ///
        pub fn new() -> Self {
            Self {
                http: HttpTransport::new(),
            }
        }
    }

    impl Default for HttpBlobStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BlobStorage for HttpBlobStorage {
        async fn upload(&self, info: &StorageInfo, content: Vec<u8>) -> crate::Result<()> {
            let headers: Vec<(HeaderName, String)> = vec![
                (HeaderName::from_static("x-ms-blob-type"), "BlockBlob".to_string()),
                (header::CONTENT_LENGTH, content.len().to_string()),
            ];
            let (status, body) = self
                .http
                .request(Method::PUT, &info.blob_url(), headers, Body::from(content))
                .await?;
            ensure_success(status, &body)
        }
    }
}
