//! REST API client.
//!
//! Provides authenticated HTTP communication with the back-office API. Every
//! response is decoded into a typed schema here, and every failure is
//! classified into an [`AppError`] before it leaves this module.

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{ClientConfig, Endpoints};
use crate::error::{AppError, AppResult};

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the API base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly network error.
fn friendly_error(url: &str, err: &reqwest::Error) -> AppError {
    if err.is_connect() {
        return AppError::Network(format!("Cannot reach the server at {url}"));
    }
    if err.is_timeout() {
        return AppError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return AppError::Network(format!("Invalid server URL: {url}"));
    }
    AppError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Decode a success body. Accepts the bare payload or a `{ "data": ... }`
/// envelope.
fn decode_body<T: DeserializeOwned>(text: &str, resource: &str) -> AppResult<T> {
    let value: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text)
            .map_err(|e| AppError::Decode(format!("{resource}: invalid JSON: {e}")))?
    };

    match serde_json::from_value::<T>(value.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(direct_err) => match value.get("data") {
            Some(inner) => serde_json::from_value::<T>(inner.clone())
                .map_err(|e| AppError::Decode(format!("{resource}: {e}"))),
            None => Err(AppError::Decode(format!("{resource}: {direct_err}"))),
        },
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    endpoints: Endpoints,
    token: Option<Zeroizing<String>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: normalize_base_url(&config.api_base_url),
            endpoints: config.endpoints.clone(),
            token: None,
        })
    }

    /// A client that sends `Authorization: Bearer <token>`.
    pub fn with_token(&self, token: Option<&str>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            endpoints: self.endpoints.clone(),
            token: token
                .filter(|t| !t.trim().is_empty())
                .map(|t| Zeroizing::new(t.to_string())),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Perform a request and return the raw success body.
    ///
    /// `path` includes the leading slash. `resource` names the target for
    /// error messages ("inventory record", "order 12", ...).
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        resource: &str,
    ) -> AppResult<String> {
        let full_url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4().to_string();

        let mut req = self
            .http
            .request(method.clone(), &full_url)
            .header("x-request-id", &request_id)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.as_str());
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        trace!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            "api request completed"
        );

        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let err = AppError::from_status(status.as_u16(), &text, resource);
            if err.is_not_found() {
                debug!(request_id = %request_id, path = %path, "api resource not found");
            } else {
                warn!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    error = %err,
                    "api request failed"
                );
            }
            return Err(err);
        }
        Ok(text)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &str) -> AppResult<T> {
        let text = self.execute(Method::GET, path, None, resource).await?;
        decode_body(&text, resource)
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        resource: &str,
    ) -> AppResult<T> {
        let text = self.execute(Method::POST, path, Some(body), resource).await?;
        decode_body(&text, resource)
    }

    /// POST where the response body is not needed.
    pub async fn post(&self, path: &str, body: &Value, resource: &str) -> AppResult<()> {
        self.execute(Method::POST, path, Some(body), resource)
            .await
            .map(|_| ())
    }

    /// PUT where the response body is not needed.
    pub async fn put(&self, path: &str, body: &Value, resource: &str) -> AppResult<()> {
        self.execute(Method::PUT, path, Some(body), resource)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        id: i64,
    }

    fn client_for(server: &MockServer) -> ApiClient {
        let config = ClientConfig {
            api_base_url: server.uri(),
            ..ClientConfig::default()
        };
        ApiClient::new(&config).expect("client")
    }

    #[test]
    fn normalizes_base_urls() {
        assert_eq!(normalize_base_url("localhost:8080/"), "http://localhost:8080");
        assert_eq!(
            normalize_base_url(" api.example.com/v1// "),
            "https://api.example.com/v1"
        );
        assert_eq!(
            normalize_base_url("http://10.0.0.2/api"),
            "http://10.0.0.2/api"
        );
    }

    #[test]
    fn decodes_bare_and_enveloped_bodies() {
        assert_eq!(
            decode_body::<Thing>(r#"{"id":1}"#, "thing").expect("bare"),
            Thing { id: 1 }
        );
        assert_eq!(
            decode_body::<Thing>(r#"{"data":{"id":2}}"#, "thing").expect("envelope"),
            Thing { id: 2 }
        );
        assert!(matches!(
            decode_body::<Thing>(r#"{"name":"x"}"#, "thing"),
            Err(AppError::Decode(_))
        ));
        assert!(matches!(
            decode_body::<Thing>("<html>", "thing"),
            Err(AppError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn sends_bearer_token_and_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/1"))
            .and(header("authorization", "Bearer secret"))
            .and(header_exists("x-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).with_token(Some("secret"));
        let thing: Thing = client.get_json("/things/1", "thing").await.expect("get");
        assert_eq!(thing, Thing { id: 1 });
    }

    #[tokio::test]
    async fn classifies_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dupe"))
            .respond_with(ResponseTemplate::new(409).set_body_json(
                serde_json::json!({"message": "email must be unique"}),
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let missing = client.get_json::<Thing>("/missing", "thing").await;
        assert_eq!(missing, Err(AppError::NotFound("thing".into())));

        let dupe = client
            .post("/dupe", &serde_json::json!({}), "organisation")
            .await;
        assert!(matches!(
            dupe,
            Err(AppError::Conflict { field: Some(ref f), .. }) if f == "email"
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let config = ClientConfig {
            api_base_url: "http://127.0.0.1:1".into(),
            request_timeout_secs: 2,
            ..ClientConfig::default()
        };
        let client = ApiClient::new(&config).expect("client");
        let res = client.get_json::<Thing>("/x", "thing").await;
        assert!(matches!(res, Err(AppError::Network(_))));
    }
}
