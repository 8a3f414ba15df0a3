//! REST/JSON implementation of the remote collaborators.
//!
//! # Endpoints
//!
//! | Call | Method | Path |
//! |------|--------|------|
//! | `fetch_all` | GET | `{base}/collections/{collection}/documents` |
//! | `put` | PUT | `{base}/collections/{collection}/documents/{id}` |
//! | `patch` | PATCH | `{base}/collections/{collection}/documents/{id}` |
//! | `upload` | PUT | `{base}/blobs/{path}` |
//!
//! All calls use bearer authentication with the configured API key. Live
//! subscriptions are emulated by polling `fetch_all` and forwarding a
//! snapshot only when the collection changed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fieldtrack_core::Collection;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{BlobStore, RemoteError, RemoteStore, SnapshotStream};
use crate::config::RemoteConfig;

const SUBSCRIPTION_BUFFER: usize = 4;

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    documents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

struct Inner {
    client: Client,
    base_url: Url,
    api_key: SecretString,
    poll_interval: Duration,
}

/// Shared HTTP plumbing for both collaborators.
#[derive(Clone)]
struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
                poll_interval: config.poll_interval,
            }),
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, RemoteError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Parse("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn document_url(&self, collection: Collection, id: &str) -> Result<Url, RemoteError> {
        self.endpoint(["collections", collection.as_str(), "documents", id])
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Document store reached over HTTP.
#[derive(Clone)]
pub struct HttpRemoteStore {
    connection: Connection,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteStore")
            .field("base_url", &self.connection.inner.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    /// Create a client for the configured document store.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Http` if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            connection: Connection::new(config)?,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    #[instrument(skip(self), fields(collection = %collection))]
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Value>, RemoteError> {
        let url = self
            .connection
            .endpoint(["collections", collection.as_str(), "documents"])?;
        let response = self
            .connection
            .inner
            .client
            .get(url)
            .bearer_auth(self.connection.inner.api_key.expose_secret())
            .send()
            .await?;
        let response = Connection::check(response).await?;

        let body: DocumentsResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        debug!(count = body.documents.len(), "Fetched remote collection");
        Ok(body.documents)
    }

    async fn subscribe(&self, collection: Collection) -> Result<SnapshotStream, RemoteError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let store = self.clone();
        let interval = self.connection.inner.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the bulk load already covered it.
            ticker.tick().await;

            let mut last: Option<Vec<Value>> = None;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match store.fetch_all(collection).await {
                    Ok(documents) => {
                        if last.as_ref() == Some(&documents) {
                            continue;
                        }
                        last = Some(documents.clone());
                        if tx.send(Ok(documents)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(collection = %collection, error = %e, "Remote poll failed");
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            debug!(collection = %collection, "Remote poll loop stopped");
        });

        Ok(rx)
    }

    #[instrument(skip(self, document), fields(collection = %collection, id = %id))]
    async fn put(&self, collection: Collection, id: &str, document: Value) -> Result<(), RemoteError> {
        let url = self.connection.document_url(collection, id)?;
        let response = self
            .connection
            .inner
            .client
            .put(url)
            .bearer_auth(self.connection.inner.api_key.expose_secret())
            .json(&document)
            .send()
            .await?;
        Connection::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, fields), fields(collection = %collection, id = %id))]
    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError> {
        let url = self.connection.document_url(collection, id)?;
        let response = self
            .connection
            .inner
            .client
            .patch(url)
            .bearer_auth(self.connection.inner.api_key.expose_secret())
            .json(&Value::Object(fields))
            .send()
            .await?;
        Connection::check(response).await?;
        Ok(())
    }
}

/// Blob storage reached over HTTP.
#[derive(Clone)]
pub struct HttpBlobStore {
    connection: Connection,
}

impl std::fmt::Debug for HttpBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBlobStore")
            .field("base_url", &self.connection.inner.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpBlobStore {
    /// Create a client for the configured blob endpoint.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Http` if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            connection: Connection::new(config)?,
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, RemoteError> {
        let url = self
            .connection
            .endpoint(std::iter::once("blobs").chain(path.split('/').filter(|s| !s.is_empty())))?;
        let response = self
            .connection
            .inner
            .client
            .put(url)
            .bearer_auth(self.connection.inner.api_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let response = Connection::check(response).await?;

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        Ok(body.url)
    }
}
