//! Sending assembled queries to a GraphQL endpoint.
//!
//! The query goes out as a GraphQL-over-HTTP POST with a JSON body of
//! `query`, `variables` and `operationName`.

use gqlrag_core::{AssembledQuery, ExecuteError};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Longest slice of an error body kept in [`ExecuteError::Status`].
const ERROR_BODY_CHARS: usize = 200;

/// Where and how to send queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint URL, e.g. `http://localhost:8000/graphql`
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Extra headers sent with every request (e.g. `Authorization`)
    pub headers: BTreeMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
            headers: BTreeMap::new(),
        }
    }
}

/// A GraphQL response. `errors` is empty when the server sent none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlResponse {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// HTTP client for one endpoint.
pub struct GraphqlClient {
    http: Client,
    url: String,
}

impl GraphqlClient {
    /// Build a client for `url` with the timeout and headers from `config`.
    pub fn new(url: impl Into<String>, config: &EndpointConfig) -> Result<Self, ExecuteError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ExecuteError::Config(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ExecuteError::Config(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| ExecuteError::Config(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the query and decode the response.
    ///
    /// A non-2xx status is an error. GraphQL `errors` in a 2xx response are
    /// returned in the [`GraphqlResponse`] for the caller to judge.
    pub async fn execute(&self, query: &AssembledQuery) -> Result<GraphqlResponse, ExecuteError> {
        info!("Executing {} against {}", query.dsl_name, self.url);

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .json(&query.to_request_body())
            .send()
            .await
            .map_err(|e| ExecuteError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecuteError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExecuteError::Http(e.to_string()))?;
        let decoded: GraphqlResponse = serde_json::from_str(&body)
            .map_err(|e| ExecuteError::InvalidResponse(e.to_string()))?;
        debug!(
            "Response from {}: data={} errors={}",
            self.url,
            decoded.data.is_some(),
            decoded.errors.len()
        );
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::{HeaderMap as RequestHeaders, StatusCode};
    use axum::Router;
    use axum::routing::post;
    use gqlrag_core::OperationKind;
    use serde_json::{Map, json};

    /// Serve `app` on an ephemeral port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn query() -> AssembledQuery {
        let mut variables = Map::new();
        variables.insert("id".to_string(), json!("42"));
        AssembledQuery {
            query: "query QueryUser($id: ID!) {\n  user(id: $id) {\n    id\n  }\n}\n".to_string(),
            variables,
            dsl_name: "query_user".to_string(),
            kind: OperationKind::Query,
            operation_name: Some("QueryUser".to_string()),
            score: 0.9,
            sources: BTreeMap::new(),
            alternatives: vec![],
        }
    }

    async fn echo(headers: RequestHeaders, Json(body): Json<Value>) -> Json<Value> {
        let tenant = headers
            .get("x-tenant")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Json(json!({ "data": { "received": body, "tenant": tenant } }))
    }

    #[tokio::test]
    async fn test_execute_posts_request_body() {
        let base = serve(Router::new().route("/graphql", post(echo))).await;
        let client = GraphqlClient::new(format!("{base}/graphql"), &EndpointConfig::default()).unwrap();

        let response = client.execute(&query()).await.unwrap();
        assert!(!response.has_errors());

        let received = &response.data.as_ref().unwrap()["received"];
        assert_eq!(received["operationName"], "QueryUser");
        assert_eq!(received["variables"], json!({ "id": "42" }));
        assert!(received["query"].as_str().unwrap().starts_with("query QueryUser"));
        assert_eq!(response.data.unwrap()["tenant"], Value::Null);
    }

    #[tokio::test]
    async fn test_configured_headers_are_sent() {
        let base = serve(Router::new().route("/graphql", post(echo))).await;
        let mut config = EndpointConfig::default();
        config.headers.insert("X-Tenant".to_string(), "acme".to_string());
        let client = GraphqlClient::new(format!("{base}/graphql"), &config).unwrap();

        let response = client.execute(&query()).await.unwrap();
        assert_eq!(response.data.unwrap()["tenant"], "acme");
    }

    #[tokio::test]
    async fn test_graphql_errors_are_returned() {
        let app = Router::new().route(
            "/graphql",
            post(|| async {
                Json(json!({
                    "data": null,
                    "errors": [{ "message": "user not found", "path": ["user"] }]
                }))
            }),
        );
        let base = serve(app).await;
        let client = GraphqlClient::new(format!("{base}/graphql"), &EndpointConfig::default()).unwrap();

        let response = client.execute(&query()).await.unwrap();
        assert!(response.has_errors());
        assert_eq!(response.errors[0]["message"], "user not found");
        assert_eq!(response.data, None);
    }

    #[tokio::test]
    async fn test_http_failure_status() {
        let long_body = "x".repeat(500);
        let app = Router::new().route(
            "/graphql",
            post(move || async move { (StatusCode::INTERNAL_SERVER_ERROR, long_body) }),
        );
        let base = serve(app).await;
        let client = GraphqlClient::new(format!("{base}/graphql"), &EndpointConfig::default()).unwrap();

        match client.execute(&query()).await {
            Err(ExecuteError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), ERROR_BODY_CHARS);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_response() {
        let app = Router::new().route("/graphql", post(|| async { "<html>gateway</html>" }));
        let base = serve(app).await;
        let client = GraphqlClient::new(format!("{base}/graphql"), &EndpointConfig::default()).unwrap();

        assert!(matches!(
            client.execute(&query()).await,
            Err(ExecuteError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GraphqlClient::new(format!("http://{addr}/graphql"), &EndpointConfig::default()).unwrap();
        assert!(matches!(client.execute(&query()).await, Err(ExecuteError::Http(_))));
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut config = EndpointConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            GraphqlClient::new("http://localhost/graphql", &config),
            Err(ExecuteError::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_config_defaults() {
        let config: EndpointConfig = serde_json::from_value(json!({ "url": "http://localhost:8000/graphql" })).unwrap();
        assert_eq!(config.url.as_deref(), Some("http://localhost:8000/graphql"));
        assert_eq!(config.timeout_secs, 30);
        assert!(config.headers.is_empty());
    }
}
