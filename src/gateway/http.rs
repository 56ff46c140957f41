//! HTTP gateway for the clario-sync document server

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{GatewayError, RemoteGateway};

#[derive(Deserialize)]
struct ListResponse {
    documents: Vec<Value>,
}

/// Talks to `clario-sync serve` over its REST API
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    token: Option<String>,
    user_id: String,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        user_id: impl Into<String>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, GatewayError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::Unavailable(format!("invalid server URL: {e}")))?;
        // Url::join treats the last segment as a file unless it ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            token,
            user_id: user_id.into(),
        })
    }

    /// Health probe; any failure counts as offline
    pub async fn ping(&self) -> bool {
        let Ok(url) = self.base_url.join("health") else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                false
            }
        }
    }

    fn collection_url(&self, collection: &str, id: Option<&str>) -> Result<Url, GatewayError> {
        let mut url = self
            .base_url
            .join("api/v1/collections/")
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GatewayError::Unavailable("server URL cannot be a base".into()))?;
            segments.pop_if_empty().push(collection);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn check(resp: Response) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn list_all(&self, collection: &str) -> Result<Vec<Value>, GatewayError> {
        let mut url = self.collection_url(collection, None)?;
        url.query_pairs_mut().append_pair("userId", &self.user_id);

        let resp = check(self.request(Method::GET, url).send().await?).await?;
        let body: ListResponse = resp.json().await?;
        Ok(body.documents)
    }

    async fn put(&self, collection: &str, id: &str, document: Value) -> Result<(), GatewayError> {
        let url = self.collection_url(collection, Some(id))?;
        check(self.request(Method::PUT, url).json(&document).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), GatewayError> {
        let url = self.collection_url(collection, Some(id))?;
        check(self.request(Method::DELETE, url).send().await?).await?;
        Ok(())
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(base, None, "u1", None).unwrap()
    }

    #[test]
    fn document_urls_escape_ids() {
        let gw = gateway("http://localhost:3030");
        let url = gw.collection_url("tasks", Some("a b/c")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3030/api/v1/collections/tasks/a%20b%2Fc"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let gw = gateway("https://example.com/clario");
        let url = gw.collection_url("tasks", None).unwrap();
        assert_eq!(url.as_str(), "https://example.com/clario/api/v1/collections/tasks");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpGateway::new("not a url", None, "u1", None).is_err());
    }
}
