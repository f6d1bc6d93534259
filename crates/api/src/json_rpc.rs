//! Minimal JSON-RPC client over HTTP.
//!
//! Used for the endpoints alloy's typed providers do not cover: relay-specific
//! methods and the legacy batched `eth_call` path, where N calls are sent as one
//! JSON array and the answers are matched back by `id`.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::error::RelayError;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One read-only call in a legacy batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthCallRequest {
    pub to: Address,
    pub data: Bytes,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl RpcResponse {
    fn into_result<T: DeserializeOwned>(self) -> Result<T, RelayError> {
        if let Some(err) = self.error {
            return Err(RelayError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let value = self
            .result
            .ok_or_else(|| RelayError::Malformed("response has neither result nor error".into()))?;
        serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))
    }
}

/// JSON-RPC client bound to one endpoint.
#[derive(Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient").field("url", &self.url).finish()
    }
}

impl JsonRpcClient {
    /// Create a client with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let url = url.into();
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(%url, ?timeout, error = %err, "HTTP client build failed, requests are unbounded");
                reqwest::Client::new()
            }
        };
        Self { client, url }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: &impl Serialize) -> Result<Value, RelayError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Http {
                url: self.url.clone(),
                reason: format!("status {status}"),
            });
        }

        response.json::<Value>().await.map_err(|e| self.http_error(e))
    }

    fn http_error(&self, err: reqwest::Error) -> RelayError {
        RelayError::Http {
            url: self.url.clone(),
            reason: err.to_string(),
        }
    }

    /// Send a single JSON-RPC request and decode its result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RelayError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };
        let value = self.post(&body).await?;
        let response: RpcResponse =
            serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))?;
        response.into_result()
    }

    /// Send `calls` as one batched `eth_call` array against `latest`.
    ///
    /// The outer result fails only when the batch itself fails; each element
    /// carries the outcome of its own call, in the order of `calls`.
    #[instrument(skip(self, calls), fields(url = %self.url, calls = calls.len()))]
    pub async fn eth_call_batch(
        &self,
        calls: &[EthCallRequest],
    ) -> Result<Vec<Result<Bytes, RelayError>>, RelayError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let body: Vec<RpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(id, call)| RpcRequest {
                jsonrpc: "2.0",
                method: "eth_call",
                params: json!([{ "to": call.to, "data": call.data }, "latest"]),
                id: id as u64,
            })
            .collect();

        let value = self.post(&body).await?;
        let responses: Vec<RpcResponse> =
            serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))?;

        debug!(responses = responses.len(), "Batched eth_call answered");
        Ok(match_batch_responses(responses, calls.len()))
    }
}

/// Re-align batch responses with their requests.
///
/// Nodes may answer a batch in any order, so responses are keyed by `id`.
/// Positional matching is used only for responses that carry no id.
fn match_batch_responses(
    responses: Vec<RpcResponse>,
    expected: usize,
) -> Vec<Result<Bytes, RelayError>> {
    let mut by_id: HashMap<u64, RpcResponse> = HashMap::with_capacity(responses.len());
    let mut positional: Vec<RpcResponse> = Vec::new();

    for response in responses {
        match response.id {
            Some(id) => {
                by_id.insert(id, response);
            }
            None => positional.push(response),
        }
    }

    let mut positional = positional.into_iter();
    (0..expected as u64)
        .map(|id| {
            let response = by_id.remove(&id).or_else(|| positional.next());
            match response {
                Some(response) => response.into_result::<Bytes>(),
                None => Err(RelayError::Malformed(format!("missing response for id {id}"))),
            }
        })
        .collect()
}
