//! # HTTP Remote Client
//!
//! [`RemoteClient`] over plain HTTP. Every depot host serves its store at
//! `{scheme}://{host}[:port]{path}/{id}`:
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET    | `{path}/{id}` | Fetch bytes (404 means absent) |
//! | PUT    | `{path}/{id}` | Store bytes |
//! | DELETE | `{path}/{id}` | Delete (404 is fine) |
//! | GET    | `{path}/{dir}?list` | JSON array of child names |
//!
//! Ids travel one percent-encoded path segment per id segment, so `#`, `?`
//! and `%` inside names reach the server intact. Transport failures and 5xx
//! answers are retried with backoff; other status codes are not.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::RemoteError;
use crate::remote::RemoteClient;
use crate::retry::RetryPolicy;

/// Connection settings for [`HttpRemoteClient`].
///
/// Custom `Debug` implementation redacts the `token` field.
#[derive(Clone)]
pub struct HttpRemoteConfig {
    /// Use `https` rather than `http`.
    pub https: bool,
    /// Port appended to every host, if any.
    pub port: Option<u16>,
    /// Path prefix of the remote store, e.g. `/depot`.
    pub path: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra attempts after a transport failure or a 5xx answer.
    pub retries: u32,
    /// Delay before the first retry, doubled for each later one.
    pub retry_backoff_ms: u64,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            https: true,
            port: None,
            path: "/depot".to_string(),
            token: None,
            timeout_secs: 30,
            retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl std::fmt::Debug for HttpRemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteConfig")
            .field("https", &self.https)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("retries", &self.retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

/// A remote store client speaking plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    config: HttpRemoteConfig,
}

impl HttpRemoteClient {
    /// Build a client from configuration.
    pub fn new(config: HttpRemoteConfig) -> Result<Self, RemoteError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &config.token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| RemoteError::Config("token is not a valid header value".into()))?,
            );
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RemoteError::Http {
                endpoint: "client_init".into(),
                source: e,
            })?;
        Ok(Self { http, config })
    }

    /// The URL an id lives at on `host`.
    pub fn url(&self, host: &str, id: &str) -> Result<Url, RemoteError> {
        let scheme = if self.config.https { "https" } else { "http" };
        let port = self.config.port.map(|p| format!(":{p}")).unwrap_or_default();
        let base = format!("{scheme}://{host}{port}/");
        let mut url =
            Url::parse(&base).map_err(|e| RemoteError::Config(format!("invalid URL {base:?}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::Config(format!("{base:?} cannot carry a path")))?
            .pop_if_empty()
            .extend(self.config.path.split('/').filter(|s| !s.is_empty()))
            .extend(id.split('/'));
        Ok(url)
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.config.retries,
            backoff: Duration::from_millis(self.config.retry_backoff_ms),
        }
    }

    async fn error_for(endpoint: String, resp: reqwest::Response) -> RemoteError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        RemoteError::Status {
            endpoint,
            status,
            body,
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch(&self, host: &str, id: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let url = self.url(host, id)?;
        let endpoint = format!("GET {url}");
        let resp = self
            .retry()
            .send(&endpoint, || self.http.get(url.clone()).send())
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::error_for(endpoint, resp).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Decode { endpoint, source: e })?;
        Ok(Some(bytes.to_vec()))
    }

    async fn push(&self, host: &str, id: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        let url = self.url(host, id)?;
        let endpoint = format!("PUT {url}");
        let resp = self
            .retry()
            .send(&endpoint, || self.http.put(url.clone()).body(bytes.clone()).send())
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        if !resp.status().is_success() {
            return Err(Self::error_for(endpoint, resp).await);
        }
        Ok(())
    }

    async fn delete(&self, host: &str, id: &str) -> Result<(), RemoteError> {
        let url = self.url(host, id)?;
        let endpoint = format!("DELETE {url}");
        let resp = self
            .retry()
            .send(&endpoint, || self.http.delete(url.clone()).send())
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        Err(Self::error_for(endpoint, resp).await)
    }

    async fn list(&self, host: &str, dir_id: &str) -> Result<Vec<String>, RemoteError> {
        let mut url = self.url(host, dir_id)?;
        url.set_query(Some("list"));
        let endpoint = format!("GET {url}");
        let resp = self
            .retry()
            .send(&endpoint, || self.http.get(url.clone()).send())
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(Self::error_for(endpoint, resp).await);
        }
        resp.json()
            .await
            .map_err(|e| RemoteError::Decode { endpoint, source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_layout() {
        let client = HttpRemoteClient::new(HttpRemoteConfig {
            port: Some(8443),
            ..HttpRemoteConfig::default()
        })
        .unwrap();
        let url = client.url("store.example.com", "nlp/File/central/lang=en/stopwords.txt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.example.com:8443/depot/nlp/File/central/lang=en/stopwords.txt"
        );
    }

    #[test]
    fn plain_http_without_port() {
        let client = HttpRemoteClient::new(HttpRemoteConfig {
            https: false,
            path: "/depot/".into(),
            ..HttpRemoteConfig::default()
        })
        .unwrap();
        assert_eq!(client.url("h", "a/b").unwrap().as_str(), "http://h/depot/a/b");
    }

    #[test]
    fn reserved_characters_stay_inside_their_segment() {
        let client = HttpRemoteClient::new(HttpRemoteConfig {
            https: false,
            ..HttpRemoteConfig::default()
        })
        .unwrap();
        let url = client.url("h", "t/File/any/notes#2?.txt").unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
        assert_eq!(url.path(), "/depot/t/File/any/notes%232%3F.txt");

        let escaped = client.url("h", "t/File/any/x%2Egz").unwrap();
        assert_eq!(escaped.path(), "/depot/t/File/any/x%252Egz");
    }

    #[test]
    fn nested_path_prefix() {
        let client = HttpRemoteClient::new(HttpRemoteConfig {
            path: "/api/depot".into(),
            ..HttpRemoteConfig::default()
        })
        .unwrap();
        assert_eq!(client.url("h", "a").unwrap().as_str(), "https://h/api/depot/a");
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = HttpRemoteConfig {
            token: Some("secret-token".into()),
            ..HttpRemoteConfig::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn bad_token_is_config_error() {
        let err = HttpRemoteClient::new(HttpRemoteConfig {
            token: Some("line\nbreak".into()),
            ..HttpRemoteConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, RemoteError::Config(_)));
    }
}
