use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::store::{RemoteError, RemoteFile, RemoteStore};

/// HTTP client for a drive-style file API: files are created under named
/// folders, addressed by server-assigned id, carrying server-side
/// modification times. Authenticates with a bearer token.
pub struct DriveClient {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    files: Vec<RemoteFile>,
}

impl DriveClient {
    pub fn new(base_url: String, access_token: String) -> Result<Self, RemoteError> {
        // Normalize URL - ensure no trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn create_file(
        &self,
        folder: &str,
        name: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<RemoteFile, RemoteError> {
        let response = self
            .client
            .post(self.url("files"))
            .query(&[("folder", folder), ("name", name)])
            .header("Content-Type", mime_type)
            .bearer_auth(&self.access_token)
            .body(content.to_vec())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailed),
            status => Err(RemoteError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn update_file(
        &self,
        file_id: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<RemoteFile, RemoteError> {
        let response = self
            .client
            .put(self.url(&format!("files/{}/content", file_id)))
            .header("Content-Type", mime_type)
            .bearer_auth(&self.access_token)
            .body(content.to_vec())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(file_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailed),
            status => Err(RemoteError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let response = self
            .client
            .get(self.url("files"))
            .query(&[("folder", folder)])
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: ListResponse = response.json().await?;
                Ok(body.files)
            }
            // An unknown folder lists as empty
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailed),
            status => Err(RemoteError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn read(&self, file_id: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let response = self
            .client
            .get(self.url(&format!("files/{}/content", file_id)))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailed),
            status => Err(RemoteError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn write(
        &self,
        folder: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
        existing_file_id: Option<&str>,
    ) -> Result<RemoteFile, RemoteError> {
        if let Some(file_id) = existing_file_id {
            match self.update_file(file_id, &content, mime_type).await {
                Ok(file) => return Ok(file),
                Err(RemoteError::NotFound(_)) => {
                    // Stale reference, the file was deleted elsewhere
                    log::warn!(
                        "Remote: file {} no longer exists, creating {} anew",
                        file_id,
                        name
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.create_file(folder, name, &content, mime_type).await
    }

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(&format!("files/{}", file_id)))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        match response.status() {
            // Already gone counts as deleted
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailed),
            status => Err(RemoteError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
