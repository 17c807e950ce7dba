use std::marker::PhantomData;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shared::{
    domain::{Entity, RecordId},
    protocol::{Envelope, ListQuery},
};
use tracing::debug;
use url::Url;

use crate::error::ControllerError;

/// The per-collection backend contract the controller talks to.
#[async_trait]
pub trait CollectionBackend<R: Entity>: Send + Sync {
    async fn list(&self, query: &ListQuery) -> Result<Vec<R>, ControllerError>;
    async fn fetch(&self, slug: &str) -> Result<R, ControllerError>;
    async fn create(&self, record: &R) -> Result<R, ControllerError>;
    async fn update(&self, slug: &str, record: &R) -> Result<R, ControllerError>;
    async fn patch(
        &self,
        id: RecordId,
        fields: &Map<String, Value>,
    ) -> Result<R, ControllerError>;
    /// `key` is a slug or a numeric id. Deleting a missing record succeeds.
    async fn delete(&self, key: &str) -> Result<(), ControllerError>;
    async fn save_all(&self, records: &[R]) -> Result<Vec<R>, ControllerError>;
}

/// `CollectionBackend` over the JSON envelope API served by the `server` crate.
pub struct HttpBackend<R> {
    http: Client,
    base_url: Url,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Entity> HttpBackend<R> {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:8080/api`.
    pub fn new(base_url: Url) -> Result<Self, ControllerError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: Url) -> Result<Self, ControllerError> {
        if base_url.cannot_be_a_base() {
            return Err(ControllerError::Transport(format!(
                "'{base_url}' cannot be used as an API base url"
            )));
        }
        Ok(Self {
            http,
            base_url,
            _kind: PhantomData,
        })
    }

    fn url(&self, key: Option<&str>) -> Result<Url, ControllerError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ControllerError::Transport(format!("invalid API base url '{}'", self.base_url))
            })?;
            segments.pop_if_empty().push(R::KIND.path_segment());
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Envelope<T>, ControllerError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(collection = %R::KIND, %status, "backend responded");

        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(ControllerError::Transport(format!(
                "backend returned {status}"
            ))),
            Err(err) => Err(ControllerError::Transport(format!(
                "malformed response from backend: {err}"
            ))),
        }
    }
}

#[async_trait]
impl<R: Entity> CollectionBackend<R> for HttpBackend<R> {
    async fn list(&self, query: &ListQuery) -> Result<Vec<R>, ControllerError> {
        let request = self.http.get(self.url(None)?).query(query);
        Ok(self.send::<Vec<R>>(request).await?.into_data()?)
    }

    async fn fetch(&self, slug: &str) -> Result<R, ControllerError> {
        let request = self.http.get(self.url(Some(slug))?);
        Ok(self.send::<R>(request).await?.into_data()?)
    }

    async fn create(&self, record: &R) -> Result<R, ControllerError> {
        let request = self.http.post(self.url(None)?).json(record);
        Ok(self.send::<R>(request).await?.into_data()?)
    }

    async fn update(&self, slug: &str, record: &R) -> Result<R, ControllerError> {
        let request = self.http.put(self.url(Some(slug))?).json(record);
        Ok(self.send::<R>(request).await?.into_data()?)
    }

    async fn patch(
        &self,
        id: RecordId,
        fields: &Map<String, Value>,
    ) -> Result<R, ControllerError> {
        let key = id.to_string();
        let request = self.http.patch(self.url(Some(&key))?).json(fields);
        Ok(self.send::<R>(request).await?.into_data()?)
    }

    async fn delete(&self, key: &str) -> Result<(), ControllerError> {
        let request = self.http.delete(self.url(Some(key))?);
        Ok(self.send::<()>(request).await?.into_ack()?)
    }

    async fn save_all(&self, records: &[R]) -> Result<Vec<R>, ControllerError> {
        let request = self.http.put(self.url(None)?).json(records);
        Ok(self.send::<Vec<R>>(request).await?.into_data()?)
    }
}
