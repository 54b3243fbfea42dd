//! A single-chain REST facade over a Cosmos SDK gRPC-gateway REST API.
//!
//! Owns endpoint health, failover among fallback URLs discovered from the
//! public Cosmos chain registry, and JSON decoding. Exactly one thread may
//! hold `&mut RestClient` at a time — its active-endpoint/unhealthy-set
//! state is not safe for concurrent mutation (see spec §5).

use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const NODE_INFO_PATH: &str = "/cosmos/base/tendermint/v1beta1/node_info";
const CHAIN_REGISTRY_URL_PREFIX: &str = "https://raw.githubusercontent.com/cosmos/chain-registry/master";

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("resource not found")]
    NotFound,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no healthy endpoint available")]
    Exhausted,
}

pub struct RestClient {
    http: Client,
    chain_id: String,
    chain_name: String,
    primary: String,
    fallbacks: Vec<String>,
    loaded_fallbacks: bool,
    active: String,
    unhealthy: HashSet<String>,
}

impl RestClient {
    pub fn new(http: Client, primary: &str, chain_id: impl Into<String>, chain_name: impl Into<String>) -> Self {
        let primary = primary.trim_end_matches('/').to_string();
        RestClient {
            http,
            chain_id: chain_id.into(),
            chain_name: chain_name.into(),
            active: primary.clone(),
            primary,
            fallbacks: Vec::new(),
            loaded_fallbacks: false,
            unhealthy: HashSet::new(),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn endpoint(&self) -> &str {
        &self.active
    }

    fn known_endpoints(&self) -> Vec<String> {
        let mut v = Vec::with_capacity(1 + self.fallbacks.len());
        v.push(self.primary.clone());
        v.extend(self.fallbacks.iter().cloned());
        v
    }

    /// Best-effort, one-shot-per-process fetch of fallback REST URLs from
    /// the public chain registry. Failures are non-fatal.
    async fn load_fallbacks(&mut self) {
        self.loaded_fallbacks = true;
        let url = format!("{CHAIN_REGISTRY_URL_PREFIX}/{}/chain.json", self.chain_name);
        let resp = match self.http.get(&url).timeout(Duration::from_secs(3)).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(chain = %self.chain_name, error = %e, "failed to fetch chain registry document");
                return;
            }
        };
        if !resp.status().is_success() {
            warn!(chain = %self.chain_name, status = %resp.status(), "chain registry fetch returned non-2xx");
            return;
        }
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(chain = %self.chain_name, error = %e, "failed to decode chain registry document");
                return;
            }
        };
        let apis = body
            .get("apis")
            .and_then(|a| a.get("rest"))
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        for api in apis {
            if let Some(addr) = api.get("address").and_then(|a| a.as_str()) {
                let addr = addr.trim_end_matches('/').to_string();
                if !addr.is_empty() && addr != self.primary && !self.fallbacks.contains(&addr) {
                    self.fallbacks.push(addr);
                }
            }
        }
        info!(
            chain = %self.chain_name,
            fallback_count = self.fallbacks.len(),
            "loaded fallback REST endpoints"
        );
    }

    /// Probe endpoints in configured order, migrating `active` to the
    /// first one that answers `node_info` with the expected chain ID.
    pub async fn health(&mut self) -> bool {
        if !self.loaded_fallbacks {
            self.load_fallbacks().await;
        }
        let endpoints = self.known_endpoints();
        if self.unhealthy.len() >= endpoints.len() {
            self.unhealthy.clear();
        }
        for ep in &endpoints {
            if self.unhealthy.contains(ep) {
                continue;
            }
            let url = format!("{ep}{NODE_INFO_PATH}");
            match self.http.get(&url).timeout(Duration::from_secs(3)).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                    Ok(body) => {
                        let network = body
                            .get("default_node_info")
                            .and_then(|n| n.get("network"))
                            .and_then(|n| n.as_str())
                            .unwrap_or("");
                        if network != self.chain_id {
                            error!(endpoint = %ep, got = %network, expected = %self.chain_id, "chain ID mismatch");
                            self.unhealthy.insert(ep.clone());
                            continue;
                        }
                        if *ep != self.active {
                            info!(from = %self.active, to = %ep, "switching active REST endpoint");
                            self.active = ep.clone();
                        }
                        return true;
                    }
                    Err(e) => {
                        warn!(endpoint = %ep, error = %e, "failed to decode node_info response");
                        self.unhealthy.insert(ep.clone());
                    }
                },
                Ok(resp) => {
                    warn!(endpoint = %ep, status = %resp.status(), "health check returned non-2xx");
                    self.unhealthy.insert(ep.clone());
                }
                Err(e) => {
                    warn!(endpoint = %ep, error = %e, "health check request failed");
                    self.unhealthy.insert(ep.clone());
                }
            }
        }
        false
    }

    /// GET `{active}{path}` with failover across known endpoints on
    /// transport/non-2xx failure. A 404 is returned as
    /// `RestError::NotFound` without marking the endpoint unhealthy — the
    /// endpoint works, the resource is simply absent.
    pub async fn try_query(&mut self, path: &str, timeout: Duration) -> Result<Value, RestError> {
        let max_attempts = self.known_endpoints().len().max(1);
        let mut attempts = 0usize;
        loop {
            let url = format!("{}{}", self.active, path);
            debug!(url = %url, "GET");
            match self.http.get(&url).timeout(timeout).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        debug!(url = %url, "resource not found");
                        return Err(RestError::NotFound);
                    }
                    if status.is_success() {
                        return resp.json::<Value>().await.map_err(RestError::Transport);
                    }
                    warn!(url = %url, status = %status, "non-2xx response");
                    self.unhealthy.insert(self.active.clone());
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "REST query failed");
                    self.unhealthy.insert(self.active.clone());
                }
            }
            attempts += 1;
            if attempts >= max_attempts || !self.health().await {
                break;
            }
        }
        error!(path = %path, "all REST endpoints failed");
        Err(RestError::Exhausted)
    }

    /// Infallible convenience wrapper used by pagination/accounting code:
    /// total failure or a 404 both collapse to an empty JSON object.
    pub async fn query(&mut self, path: &str) -> Value {
        self.query_with_timeout(path, DEFAULT_QUERY_TIMEOUT).await
    }

    pub async fn query_with_timeout(&mut self, path: &str, timeout: Duration) -> Value {
        match self.try_query(path, timeout).await {
            Ok(v) => v,
            Err(_) => json!({}),
        }
    }
}
