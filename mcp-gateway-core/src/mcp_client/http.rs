use super::{McpClient, McpRequest, McpResponse};
use crate::error::{DispatchError, ProtocolError, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// MCP over HTTP: one POST per call against the instance's endpoint.
/// Built fresh per instance rather than pooled globally — `reqwest::Client`
/// is already cheap to clone and keeps its own connection pool internally,
/// so this just fixes the per-instance timeout.
pub struct HttpMcpClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpMcpClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    async fn dispatch(&self, request: McpRequest) -> Result<Value, DispatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout { timeout_secs: 0 }
                } else {
                    TransportError::Http(e)
                }
            })?;

        let body: McpResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport(TransportError::Http(e)))?;

        if let Some(err) = body.error {
            return Err(DispatchError::Protocol(ProtocolError::RemoteError { message: err.message }));
        }
        body.result
            .ok_or_else(|| DispatchError::Protocol(ProtocolError::MissingField { field: "result".to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn dispatch_returns_result_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"tools": []}
            })))
            .mount(&server)
            .await;

        let client = HttpMcpClient::new(server.uri(), Duration::from_secs(5));
        let result = client
            .dispatch(McpRequest::new(1, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"tools": []}));
    }

    #[tokio::test]
    async fn dispatch_surfaces_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let client = HttpMcpClient::new(server.uri(), Duration::from_secs(5));
        let err = client
            .dispatch(McpRequest::new(1, "tools/call", None))
            .await
            .unwrap_err();
        assert!(!err.is_retriable());
    }
}
