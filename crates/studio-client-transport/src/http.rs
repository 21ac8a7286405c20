//! HTTP transport for the studio server.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, Url};
use studio_client_core::{
    ByteStream, ClientConfig, InitData, StreamRequest, Transport, TransportError,
};

/// `reqwest` transport with a cookie store, so the server session cookie
/// set on init is sent on every stream call.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for a base URL with default client settings.
    ///
    /// # Errors
    /// Returns error if the base URL does not parse or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::from_config(&ClientConfig::new(base_url))
    }

    /// Create a transport from configuration.
    ///
    /// # Errors
    /// Returns error if the base URL does not parse or the client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder().cookie_store(true);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Self::with_client(client, &config.base_url)
    }

    /// Use a preconfigured client. It must keep cookies to carry credentials.
    ///
    /// # Errors
    /// Returns error if the base URL does not parse.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, TransportError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        Url::parse(&base_url).map_err(|e| TransportError::Url(format!("{base_url}: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn init_url(&self, query: &str) -> Result<Url, TransportError> {
        let query = query.trim();
        let raw = if query.is_empty() || query.starts_with('?') {
            format!("{}/init{query}", self.base_url)
        } else {
            format!("{}/init?{query}", self.base_url)
        };
        Url::parse(&raw).map_err(|e| TransportError::Url(format!("{raw}: {e}")))
    }

    fn stream_url(&self, request: &StreamRequest) -> Result<Url, TransportError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| TransportError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| TransportError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push("stream")
            .push(request.run_id());
        let pairs = request.query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }
}

fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(TransportError::Status {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_owned(),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_init(&self, query: &str) -> Result<InitData, TransportError> {
        let url = self.init_url(query)?;
        tracing::debug!(%url, "init request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        check_status(response)?
            .json::<InitData>()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let url = self.stream_url(request)?;
        tracing::debug!(%url, resume = request.is_resume(), "stream request");

        let response = self
            .client
            .post(url)
            .json(&request.body())
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(check_status(response)?
            .bytes_stream()
            .map_err(|e| TransportError::Request(e.to_string()))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use studio_client_core::Checkpoint;

    use super::*;

    #[test]
    fn test_init_url_appends_raw_query() {
        let transport = HttpTransport::new("http://localhost:8080/").unwrap();
        let url = transport.init_url("?instance=default").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/init?instance=default");
    }

    #[test]
    fn test_init_url_adds_missing_question_mark() {
        let transport = HttpTransport::new("http://localhost:8080").unwrap();
        let url = transport.init_url("instance=x").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/init?instance=x");
        let url = transport.init_url("").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/init");
    }

    #[test]
    fn test_status_text_is_canonical_reason() {
        let teapot = axum::http::Response::builder().status(418).body("").unwrap();
        assert_eq!(
            check_status(Response::from(teapot)).unwrap_err(),
            TransportError::Status {
                status: 418,
                status_text: "I'm a teapot".into(),
            }
        );

        let unnamed = axum::http::Response::builder().status(599).body("").unwrap();
        assert_eq!(
            check_status(Response::from(unnamed)).unwrap_err().to_string(),
            ""
        );
    }

    #[test]
    fn test_stream_url_for_start() {
        let transport = HttpTransport::new("http://localhost:8080/studio").unwrap();
        let url = transport
            .stream_url(&StreamRequest::Start {
                run_id: "r1".into(),
                thread_id: Some("default".into()),
                inputs: Map::new(),
            })
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/studio/stream/r1?thread=default");
    }

    #[test]
    fn test_stream_url_for_resume_encodes_values() {
        let transport = HttpTransport::new("http://localhost:8080").unwrap();
        let url = transport
            .stream_url(&StreamRequest::Resume {
                run_id: "r1".into(),
                thread_id: Some("t 1".into()),
                checkpoint: Checkpoint::new("wait_for_input", json!({})).with_checkpoint_id("cp&1"),
            })
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/stream/r1?thread=t+1&resume=true&node=wait_for_input&checkpoint=cp%261"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::Url(_))
        ));
    }
}
