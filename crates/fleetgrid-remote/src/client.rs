//! Minimal JSON-over-HTTP/1.1 client shared by the adapters.

use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};

#[derive(Clone)]
pub struct JsonClient {
    base: String,
    timeout: Duration,
    http: Client<HttpConnector, Full<Bytes>>,
}

impl JsonClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            http: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(&self, method: Method, path: &str, body: Vec<u8>) -> RemoteResult<(StatusCode, Bytes)> {
        let uri = format!("{}{path}", self.base);
        let req = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(CONTENT_TYPE, "application/json")
            .header("user-agent", "fleetgrid/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RemoteError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        let resp = tokio::time::timeout(self.timeout, self.http.request(req))
            .await
            .map_err(|_| RemoteError::Timeout(uri.clone()))?
            .map_err(|e| RemoteError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| RemoteError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?
            .to_bytes();
        debug!(%method, %uri, %status, size = body.len(), "remote call");
        Ok((status, body))
    }

    fn check(uri: String, status: StatusCode, body: &Bytes) -> RemoteResult<()> {
        if status.is_success() {
            return Ok(());
        }
        Err(RemoteError::Status {
            uri,
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).chars().take(200).collect(),
        })
    }

    fn decode<T: DeserializeOwned>(uri: &str, body: &Bytes) -> RemoteResult<T> {
        serde_json::from_slice(body).map_err(|e| RemoteError::Decode {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET and decode; a 404 is `None`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<Option<T>> {
        let (status, body) = self.send(Method::GET, path, Vec::new()).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let uri = format!("{}{path}", self.base);
        Self::check(uri.clone(), status, &body)?;
        Self::decode(&uri, &body).map(Some)
    }

    /// POST a JSON body and decode the answer.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> RemoteResult<T> {
        let uri = format!("{}{path}", self.base);
        let (status, resp) = self.send(Method::POST, path, encode(&uri, body)?).await?;
        Self::check(uri.clone(), status, &resp)?;
        Self::decode(&uri, &resp)
    }

    /// POST a JSON body, ignoring whatever comes back on success.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> RemoteResult<()> {
        let uri = format!("{}{path}", self.base);
        let (status, resp) = self.send(Method::POST, path, encode(&uri, body)?).await?;
        Self::check(uri, status, &resp)
    }
}

fn encode<B: Serialize>(uri: &str, body: &B) -> RemoteResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| RemoteError::Request {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}
