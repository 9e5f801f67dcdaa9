//! [`RemoteClient`] over HTTP, for `ferry-server` style object endpoints.
//!
//! | call       | request                                  |
//! |------------|------------------------------------------|
//! | `create`   | `POST   {base}/objects/{type}`           |
//! | `retrieve` | `GET    {base}/objects/{type}/{id}?fields=A,B` |
//! | `update`   | `PATCH  {base}/objects/{type}/{id}`      |
//! | `delete`   | `DELETE {base}/objects/{type}/{id}`      |

use crate::error::RemoteError;
use crate::record::Record;
use crate::remote::{RemoteClient, RemoteResult};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// HTTP client for an object server.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, entity_type: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/objects/{entity_type}/{id}", self.base_url),
            None => format!("{}/objects/{entity_type}", self.base_url),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> RemoteResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }
}

/// Turn a non-success response into [`RemoteError::Status`].
async fn check(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create(&self, entity_type: &str, fields: &Record) -> RemoteResult<String> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, self.url(entity_type, None))
                    .json(fields),
            )
            .await?;
        let created: CreateResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(created.id)
    }

    async fn retrieve(
        &self,
        entity_type: &str,
        id: &str,
        fieldlist: Option<&[&str]>,
    ) -> RemoteResult<Option<Record>> {
        let mut builder = self.request(reqwest::Method::GET, self.url(entity_type, Some(id)));
        if let Some(fields) = fieldlist {
            builder = builder.query(&[("fields", fields.join(","))]);
        }
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = check(response)
            .await?
            .json::<Record>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(Some(record))
    }

    async fn update(&self, entity_type: &str, id: &str, fields: &Record) -> RemoteResult<()> {
        let response = self
            .send(
                self.request(reqwest::Method::PATCH, self.url(entity_type, Some(id)))
                    .json(fields),
            )
            .await?;
        check(response).await.map(|_| ())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> RemoteResult<()> {
        let response = self
            .send(self.request(reqwest::Method::DELETE, self.url(entity_type, Some(id))))
            .await?;
        check(response).await.map(|_| ())
    }
}
