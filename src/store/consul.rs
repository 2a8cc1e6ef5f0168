//! Consul-compatible KV store over HTTP.
//!
//! # Responsibilities
//! - Translate blocking queries to `GET /v1/kv/<key>?index=&wait=`
//! - Read the change index from `X-Consul-Index`
//! - Decode base64 values; treat 404 as "nothing there"

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::StoreConfig;
use crate::store::{HealthKv, KvError, KvPair, QueryMeta, QueryOptions};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulPair {
    key: String,
    value: Option<String>,
    #[serde(default)]
    modify_index: u64,
}

/// `HealthKv` backed by a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulKv {
    client: reqwest::Client,
    address: String,
    token: Option<String>,
    default_wait: Duration,
    slack: Duration,
}

impl ConsulKv {
    pub fn new(config: &StoreConfig) -> Result<Self, KvError> {
        let client = reqwest::Client::builder()
            .user_agent("health-watch")
            .build()
            .map_err(|e| KvError::Query {
                op: "connect",
                key: config.address.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            address: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            default_wait: Duration::from_secs(config.wait_secs),
            slack: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Run one blocking query. `Ok((None, _))` means the store answered 404.
    async fn query(
        &self,
        op: &'static str,
        key: &str,
        recurse: bool,
        opts: QueryOptions,
    ) -> Result<(Option<Vec<KvPair>>, QueryMeta), KvError> {
        let wait = opts.wait_time.unwrap_or(self.default_wait);
        let mut params: Vec<(&str, String)> = Vec::with_capacity(3);
        if recurse {
            params.push(("recurse", "true".to_string()));
        }
        if opts.wait_index > 0 {
            params.push(("index", opts.wait_index.to_string()));
            params.push(("wait", format!("{}ms", wait.as_millis())));
        }

        let mut request = self
            .client
            .get(format!("{}/v1/kv/{}", self.address, key))
            .query(&params)
            .timeout(wait + self.slack);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| KvError::Query {
            op,
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let malformed = |reason: String| KvError::Malformed {
            op,
            key: key.to_string(),
            reason,
        };

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(KvError::Status {
                op,
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        let last_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| malformed(format!("missing or invalid {} header", INDEX_HEADER)))?;
        let meta = QueryMeta { last_index };

        if status == StatusCode::NOT_FOUND {
            return Ok((None, meta));
        }

        let raw: Vec<ConsulPair> = response
            .json()
            .await
            .map_err(|e| malformed(e.to_string()))?;

        let mut pairs = Vec::with_capacity(raw.len());
        for pair in raw {
            let value = match pair.value {
                Some(encoded) => STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| malformed(format!("value of {}: {}", pair.key, e)))?,
                None => Vec::new(),
            };
            pairs.push(KvPair {
                key: pair.key,
                value,
                modify_index: pair.modify_index,
            });
        }
        Ok((Some(pairs), meta))
    }
}

#[async_trait]
impl HealthKv for ConsulKv {
    async fn list(
        &self,
        prefix: &str,
        opts: QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), KvError> {
        let (pairs, meta) = self.query("list", prefix, true, opts).await?;
        Ok((pairs.unwrap_or_default(), meta))
    }

    async fn get(
        &self,
        key: &str,
        opts: QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), KvError> {
        let (pairs, meta) = self.query("get", key, false, opts).await?;
        let pair = pairs.and_then(|pairs| pairs.into_iter().find(|p| p.key == key));
        Ok((pair, meta))
    }
}
