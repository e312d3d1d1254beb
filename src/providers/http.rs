//! HTTP collection endpoint client.
//!
//! Talks to a conventional REST collection resource:
//!
//! | Operation | Request |
//! | --------- | ------- |
//! | list      | `GET    {url}` → JSON array |
//! | create    | `POST   {url}` → created item |
//! | update    | `PUT    {url}/{id}` → stored item |
//! | delete    | `DELETE {url}/{id}` |
//!
//! The URL may contain a `{scope}` placeholder, replaced with the scope key
//! of each request (e.g. `https://api.example.com/users/{scope}/projects`).

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};

use super::traits::{CollectionMutator, CollectionProvider};
use crate::types::{Item, ScopeKey};
use crate::{CorralError, Result};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one REST collection resource.
///
/// Implements both [`CollectionProvider`] and [`CollectionMutator`].
pub struct HttpCollection<T> {
    name: String,
    url: String,
    bearer_token: Option<String>,
    http: Client,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpCollection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            url: self.url.clone(),
            bearer_token: self.bearer_token.clone(),
            http: self.http.clone(),
            _item: PhantomData,
        }
    }
}

impl<T: Item> HttpCollection<T> {
    /// Create a client for `url` with the default timeout.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CorralError::Configuration(format!("failed to build HTTP client: {e}")))?;
        let url = url.into();
        Ok(Self {
            name: format!("http:{url}"),
            url,
            bearer_token: None,
            http,
            _item: PhantomData,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Override the provider name used in logs and metrics.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn collection_url(&self, scope: &ScopeKey) -> String {
        self.url.replace("{scope}", scope.as_str())
    }

    fn item_url(&self, scope: &ScopeKey, item: &T) -> Result<String> {
        let id = item.id();
        if id.is_empty() {
            return Err(CorralError::InvalidInput(
                "item has no id to address".to_string(),
            ));
        }
        Ok(format!(
            "{}/{}",
            self.collection_url(scope).trim_end_matches('/'),
            id
        ))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        handle_response_errors(&response)?;
        Ok(response)
    }
}

fn map_transport_error(e: reqwest::Error) -> CorralError {
    if e.is_timeout() {
        CorralError::Timeout
    } else {
        CorralError::Http(e.to_string())
    }
}

/// Read the body, then parse it. A body that arrives but does not parse
/// is a data error, not a transport one, so it is never retried.
async fn decode<R: serde::de::DeserializeOwned>(response: Response) -> Result<R> {
    let body = response.bytes().await.map_err(map_transport_error)?;
    Ok(serde_json::from_slice(&body)?)
}

fn handle_response_errors(response: &Response) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }

    match status.as_u16() {
        401 | 403 => Err(CorralError::AuthenticationFailed),
        408 | 504 => Err(CorralError::Timeout),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(CorralError::RateLimited { retry_after })
        }
        code => Err(CorralError::Api {
            status: code,
            message: format!("collection endpoint error: {status}"),
        }),
    }
}

#[async_trait]
impl<T: Item> CollectionProvider<T> for HttpCollection<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, scope: &ScopeKey) -> Result<Vec<T>> {
        let response = self
            .send(self.http.get(self.collection_url(scope)))
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl<T: Item> CollectionMutator<T> for HttpCollection<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, scope: &ScopeKey, item: &T) -> Result<T> {
        let response = self
            .send(self.http.post(self.collection_url(scope)).json(item))
            .await?;
        decode(response).await
    }

    async fn update(&self, scope: &ScopeKey, item: &T) -> Result<T> {
        let url = self.item_url(scope, item)?;
        let response = self.send(self.http.put(url).json(item)).await?;
        decode(response).await
    }

    async fn delete(&self, scope: &ScopeKey, item: &T) -> Result<()> {
        let url = self.item_url(scope, item)?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }
}
