//! One-shot HTTP request client.
//!
//! Sends a single request built from the UI's editor state: enabled query
//! params and headers, optional body, and one of the built-in auth modes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;

/// Errors from the one-shot request path.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Method string is not valid HTTP.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// Request failed at the transport level.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Authentication settings for a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestAuth {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub username: String,
    pub password: String,
    pub token: String,
    pub key: String,
    pub value: String,
}

/// A key/value row from the UI editor; disabled rows are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyValue {
    pub id: String,
    pub key: String,
    pub value: String,
    pub enabled: bool,
    pub description: String,
}

/// One outgoing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestData {
    pub method: String,
    pub url: String,
    pub params: Vec<KeyValue>,
    pub headers: Vec<KeyValue>,
    pub body: String,
    pub body_type: String,
    pub auth: Option<RequestAuth>,
}

/// Captured response surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseData {
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// One-shot HTTP client with a fixed 30 s timeout.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    /// Send one request and capture the response.
    pub async fn send_request(&self, req: RequestData) -> HttpResult<ResponseData> {
        let method: reqwest::Method = req
            .method
            .parse()
            .map_err(|_| HttpError::InvalidMethod(req.method.clone()))?;

        let mut builder = self.client.request(method, &req.url);

        let params = enabled_pairs(&req.params);
        if !params.is_empty() {
            builder = builder.query(&params);
        }

        for (key, value) in enabled_pairs(&req.headers) {
            builder = builder.header(key, value);
        }

        if let Some((name, value)) = req.auth.as_ref().and_then(auth_header) {
            builder = builder.header(name, value);
        }

        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        debug!("[HTTP] {} {}", req.method, req.url);
        let response = builder.send().await?;

        let status = response.status();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
        }

        let body = response.text().await?;

        Ok(ResponseData {
            status_code: status.as_u16(),
            status_text: format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            ),
            headers,
            body,
        })
    }
}

fn enabled_pairs(rows: &[KeyValue]) -> Vec<(String, String)> {
    rows.iter()
        .filter(|row| row.enabled && !row.key.is_empty())
        .map(|row| (row.key.clone(), row.value.clone()))
        .collect()
}

/// Resolve the auth mode to a single request header.
fn auth_header(auth: &RequestAuth) -> Option<(String, String)> {
    match auth.auth_type.as_str() {
        "basic" => {
            let credentials = BASE64.encode(format!("{}:{}", auth.username, auth.password));
            Some(("Authorization".to_string(), format!("Basic {}", credentials)))
        }
        "bearer" => Some((
            "Authorization".to_string(),
            format!("Bearer {}", auth.token),
        )),
        "api-key" => {
            if auth.key.is_empty() {
                None
            } else {
                Some((auth.key.clone(), auth.value.clone()))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        let header = auth_header(&RequestAuth {
            auth_type: "basic".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(header.0, "Authorization");
        assert_eq!(header.1, format!("Basic {}", BASE64.encode("user:pass")));
    }

    #[test]
    fn test_bearer_and_api_key_headers() {
        let bearer = auth_header(&RequestAuth {
            auth_type: "bearer".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(bearer, ("Authorization".to_string(), "Bearer tok".to_string()));

        let api_key = auth_header(&RequestAuth {
            auth_type: "api-key".to_string(),
            key: "X-Api-Key".to_string(),
            value: "secret".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(api_key, ("X-Api-Key".to_string(), "secret".to_string()));

        assert!(auth_header(&RequestAuth::default()).is_none());
    }

    #[test]
    fn test_disabled_rows_are_skipped() {
        let rows = vec![
            KeyValue {
                key: "a".to_string(),
                value: "1".to_string(),
                enabled: true,
                ..Default::default()
            },
            KeyValue {
                key: "b".to_string(),
                value: "2".to_string(),
                enabled: false,
                ..Default::default()
            },
            KeyValue {
                key: String::new(),
                value: "3".to_string(),
                enabled: true,
                ..Default::default()
            },
        ];

        assert_eq!(enabled_pairs(&rows), vec![("a".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn test_send_request_against_local_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();

            let body = if request.contains("authorization: Bearer tok")
                || request.contains("Authorization: Bearer tok")
            {
                "authed"
            } else {
                "anonymous"
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        let client = HttpClient::new();
        let response = client
            .send_request(RequestData {
                method: "GET".to_string(),
                url: format!("http://{}/check", addr),
                auth: Some(RequestAuth {
                    auth_type: "bearer".to_string(),
                    token: "tok".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.status_text, "200 OK");
        assert_eq!(response.body, "authed");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("text/plain")
        );
    }
}
