//! HTTP client for the service REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{BackupDocument, MetricKind, MetricRequestPayload, HEALTH_PATH, LIST_PATH};
use crate::error::{RemediationError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations the backup and restore flows need from the service
#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// Base URL requests are sent to
    fn base_url(&self) -> &str;

    /// Raw body of the listing endpoint, optionally filtered by metric type
    async fn list_raw(&self, filter: Option<&str>) -> Result<String>;

    /// Submit a request payload; returns the new request id when reported
    async fn schedule(
        &self,
        kind: MetricKind,
        payload: &MetricRequestPayload,
    ) -> Result<Option<String>>;

    /// Parsed listing
    async fn list(&self, filter: Option<&str>) -> Result<BackupDocument> {
        let body = self.list_raw(filter).await?;
        BackupDocument::parse(&body)
    }
}

/// Health endpoint check against an arbitrary base URL
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Ok with the status code when the endpoint answers 2xx
    async fn check(&self, base_url: &str) -> Result<u16>;
}

/// REST client for one service instance
pub struct TrustyAiClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl TrustyAiClient {
    /// Create a client for `base_url` authenticating with `token`
    pub fn new(base_url: &str, token: impl Into<String>, insecure: bool) -> Result<Self> {
        Ok(Self {
            client: http_client(insecure)?,
            base_url: normalize(base_url)?,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

#[async_trait]
impl MetricsApi for TrustyAiClient {
    fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    async fn list_raw(&self, filter: Option<&str>) -> Result<String> {
        let mut url = self.url(LIST_PATH)?;
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            url.query_pairs_mut().append_pair("type", filter);
        }
        debug!(url = %url, "Fetching scheduled metric requests");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.text().await?)
    }

    async fn schedule(
        &self,
        kind: MetricKind,
        payload: &MetricRequestPayload,
    ) -> Result<Option<String>> {
        let url = self.url(kind.endpoint())?;
        debug!(url = %url, model_id = %payload.model_id(), "Scheduling metric request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(payload.as_map())
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;

        Ok(serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("requestId").and_then(Value::as_str).map(str::to_string)))
    }
}

/// Health checker used by the preflight connectivity check
pub struct HttpHealthProbe {
    client: Client,
    token: Option<String>,
}

impl HttpHealthProbe {
    pub fn new(token: Option<String>, insecure: bool) -> Result<Self> {
        Ok(Self {
            client: http_client(insecure)?,
            token,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, base_url: &str) -> Result<u16> {
        let url = normalize(base_url)?.join(HEALTH_PATH.trim_start_matches('/'))?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = ensure_success(request.send().await?).await?;
        Ok(response.status().as_u16())
    }
}

fn http_client(insecure: bool) -> Result<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(insecure)
        .build()?)
}

/// Parse a base URL so that relative joins append to its path
fn normalize(base_url: &str) -> Result<Url> {
    let trimmed = base_url.trim().trim_end_matches('/');
    Ok(Url::parse(&format!("{}/", trimmed))?)
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemediationError::ServiceApi {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn payload() -> MetricRequestPayload {
        serde_json::from_value(json!({
            "modelId": "credit",
            "metricName": "SPD",
            "protectedAttribute": "age",
            "batchSize": 100,
            "thresholdDelta": 0.1
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_sends_token_and_filter() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/metrics/all/requests")
            .match_query(Matcher::UrlEncoded("type".into(), "fairness".into()))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"requests": []}"#)
            .create_async()
            .await;

        let client = TrustyAiClient::new(&server.url(), "secret", false).unwrap();
        let doc = client.list(Some("fairness")).await.unwrap();

        assert!(doc.requests.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_keeps_base_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/trustyai/metrics/all/requests")
            .with_status(200)
            .with_body(r#"{"requests": []}"#)
            .create_async()
            .await;

        let base = format!("{}/trustyai/", server.url());
        let client = TrustyAiClient::new(&base, "t", false).unwrap();
        client.list_raw(None).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/metrics/all/requests")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = TrustyAiClient::new(&server.url(), "t", false).unwrap();
        let err = client.list_raw(None).await.unwrap_err();

        match err {
            RemediationError::ServiceApi { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_listing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/metrics/all/requests")
            .with_status(200)
            .with_body(r#"{"items": 3}"#)
            .create_async()
            .await;

        let client = TrustyAiClient::new(&server.url(), "t", false).unwrap();
        let err = client.list(None).await.unwrap_err();
        assert!(matches!(err, RemediationError::MalformedListing(_)));
    }

    #[tokio::test]
    async fn test_schedule_posts_payload_and_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/metrics/group/fairness/spd/request")
            .match_body(Matcher::PartialJson(json!({
                "modelId": "credit",
                "metricName": "SPD",
                "thresholdDelta": 0.1
            })))
            .with_status(200)
            .with_body(r#"{"requestId": "new-id", "timestamp": "2024-01-01T00:00:00"}"#)
            .create_async()
            .await;

        let client = TrustyAiClient::new(&server.url(), "t", false).unwrap();
        let id = client.schedule(MetricKind::Spd, &payload()).await.unwrap();

        assert_eq!(id.as_deref(), Some("new-id"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_probe() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/q/health/ready")
            .with_status(200)
            .create_async()
            .await;

        let probe = HttpHealthProbe::new(None, false).unwrap();
        assert_eq!(probe.check(&server.url()).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_health_probe_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/q/health/ready")
            .with_status(503)
            .create_async()
            .await;

        let probe = HttpHealthProbe::new(Some("t".to_string()), false).unwrap();
        assert!(probe.check(&server.url()).await.is_err());
    }
}
