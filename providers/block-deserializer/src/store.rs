//! Schema sources backed by Redis and the chain node HTTP API

use crate::abi::Abi;
use crate::error::SchemaError;
use crate::type_cache::{ChainAbiSource, SchemaStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Key holding the schema change history of every account
pub fn history_key(chain: &str) -> String {
    format!("{}:abi_cache", chain)
}

/// Key holding the schema JSON stored for a change at `block`
pub fn abi_key(chain: &str, block: u64, account: &str) -> String {
    format!("{}:{}:{}", chain, block, account)
}

/// Versioned schema history kept in Redis by the schema store service
#[derive(Clone)]
pub struct RedisSchemaStore {
    chain: String,
    redis: ConnectionManager,
}

impl RedisSchemaStore {
    pub async fn connect(url: &str, chain: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to create Redis client")?;
        let redis = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("Schema store connected to {}", url);
        Ok(Self {
            chain: chain.to_string(),
            redis,
        })
    }
}

fn store_error(e: redis::RedisError) -> SchemaError {
    SchemaError::Store(e.to_string())
}

/// Picks one account's heights out of the serialized history map
pub fn parse_history(json: &str, account: &str) -> Result<Option<Vec<u64>>, SchemaError> {
    let mut history: HashMap<String, Vec<u64>> =
        serde_json::from_str(json).map_err(|e| SchemaError::Store(format!("invalid history: {}", e)))?;
    Ok(history.remove(account).map(|mut heights| {
        heights.sort_unstable();
        heights
    }))
}

#[async_trait]
impl SchemaStore for RedisSchemaStore {
    async fn changed_at(&self, account: &str) -> Result<Option<Vec<u64>>, SchemaError> {
        let raw: Option<String> = self
            .redis
            .clone()
            .get(history_key(&self.chain))
            .await
            .map_err(store_error)?;
        match raw {
            Some(json) => parse_history(&json, account),
            None => Ok(None),
        }
    }

    async fn abi_at(&self, account: &str, block: u64) -> Result<Option<String>, SchemaError> {
        let key = abi_key(&self.chain, block, account);
        debug!("Loading stored schema {}", key);
        self.redis.clone().get(key).await.map_err(store_error)
    }
}

#[derive(Debug, Serialize)]
struct GetAbiRequest<'a> {
    account_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct GetAbiResponse {
    pub account_name: String,
    #[serde(default)]
    pub abi: Option<Abi>,
}

/// `get_abi` against a chain node
#[derive(Clone)]
pub struct HttpChainApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChainApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chain/get_abi", self.base_url)
    }
}

#[async_trait]
impl ChainAbiSource for HttpChainApi {
    async fn get_abi(&self, account: &str) -> Result<Abi, SchemaError> {
        let unavailable = |reason: String| SchemaError::Unavailable {
            account: account.to_string(),
            reason,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&GetAbiRequest {
                account_name: account,
            })
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unavailable(e.to_string()))?;

        let body: GetAbiResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid get_abi response: {}", e)))?;

        body.abi
            .ok_or_else(|| unavailable("account has no schema set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(history_key("eos"), "eos:abi_cache");
        assert_eq!(abi_key("eos", 1200, "eosio.token"), "eos:1200:eosio.token");
    }

    #[test]
    fn test_parse_history() {
        let json = r#"{"eosio.token": [300, 100, 200], "eosio": [1]}"#;
        assert_eq!(
            parse_history(json, "eosio.token").unwrap(),
            Some(vec![100, 200, 300])
        );
        assert_eq!(parse_history(json, "unknown").unwrap(), None);
        assert!(parse_history("[]", "eosio").is_err());
    }

    #[test]
    fn test_get_abi_response() {
        let body: GetAbiResponse =
            serde_json::from_str(r#"{"account_name": "alice"}"#).unwrap();
        assert!(body.abi.is_none());

        let body: GetAbiResponse = serde_json::from_str(
            r#"{"account_name": "eosio.token", "abi": {"version": "eosio::abi/1.1", "structs": []}}"#,
        )
        .unwrap();
        assert_eq!(body.abi.unwrap().version, "eosio::abi/1.1");
    }

    #[test]
    fn test_endpoint() {
        let api = HttpChainApi::new("http://127.0.0.1:8888/").unwrap();
        assert_eq!(api.endpoint(), "http://127.0.0.1:8888/v1/chain/get_abi");
    }
}
