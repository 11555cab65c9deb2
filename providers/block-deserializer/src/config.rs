//! Configuration for the block deserializer

use anyhow::{Context, Result};
use index_queues::block_queue;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Block deserializer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeserializerConfig {
    /// Chain short name, the first token of every subject
    pub chain: String,
    /// Instance identifier, used for the durable consumer name
    pub worker_id: String,
    /// Inbound block queue this worker consumes
    pub worker_queue: String,

    // NATS configuration
    pub nats_url: String,
    pub stream_name: String,
    /// Deliveries before JetStream gives up on a rejected batch message
    pub max_deliver: i64,

    /// Versioned schema store
    pub redis_url: String,
    /// Chain node HTTP API for head schema fetches
    pub chain_api_url: String,

    // Processing
    /// Maximum number of block messages in one batch
    pub prefetch: usize,
    pub index_partitions: u32,
    pub action_partition_ratio: u32,
    /// Capacity of the bounded channel in front of the publisher
    pub output_buffer: usize,

    pub processing: ProcessingOptions,
    pub cache: CacheConfig,
}

/// Switches that shape what is extracted from each block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingOptions {
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub process_deltas: bool,
    pub index_deltas: bool,
    pub index_all_deltas: bool,
    pub enable_indexing: bool,
    /// Only follow schema updates, skip contract rows
    pub abi_cache_mode: bool,
    pub process_generated_transactions: bool,
    pub stream_traces: bool,
    pub stream_deltas: bool,
    pub state: StateFlags,
}

/// Which latest-state documents are produced
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StateFlags {
    pub voters: bool,
    pub proposals: bool,
    pub accounts: bool,
}

/// Type cache tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    pub sweep_interval_secs: u64,
    /// Entries with fewer cumulative hits are dropped by the sweep
    pub min_hits: u64,
    /// Account that may use the built-in fallback schema
    pub fallback_account: String,
    /// Head schema fetches slower than this are logged
    pub slow_fetch_ms: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl DeserializerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let chain = env_or("DESERIALIZER_CHAIN", "eos");
        let worker_queue = env::var("DESERIALIZER_WORKER_QUEUE")
            .unwrap_or_else(|_| block_queue(&chain, 1));

        let processing = ProcessingOptions {
            fetch_block: env_flag("DESERIALIZER_FETCH_BLOCK", true),
            fetch_traces: env_flag("DESERIALIZER_FETCH_TRACES", true),
            process_deltas: env_flag("DESERIALIZER_PROCESS_DELTAS", true),
            index_deltas: env_flag("DESERIALIZER_INDEX_DELTAS", true),
            index_all_deltas: env_flag("DESERIALIZER_INDEX_ALL_DELTAS", false),
            enable_indexing: env_flag("DESERIALIZER_ENABLE_INDEXING", true),
            abi_cache_mode: env_flag("DESERIALIZER_ABI_CACHE_MODE", false),
            process_generated_transactions: env_flag("DESERIALIZER_PROCESS_GEN_TX", false),
            stream_traces: env_flag("DESERIALIZER_STREAM_TRACES", false),
            stream_deltas: env_flag("DESERIALIZER_STREAM_DELTAS", false),
            state: StateFlags {
                voters: env_flag("DESERIALIZER_VOTERS_STATE", false),
                proposals: env_flag("DESERIALIZER_PROPOSAL_STATE", false),
                accounts: env_flag("DESERIALIZER_ACCOUNT_STATE", false),
            },
        };

        let cache = CacheConfig {
            sweep_interval_secs: env_or("DESERIALIZER_CACHE_SWEEP_SECS", "25")
                .parse()
                .context("DESERIALIZER_CACHE_SWEEP_SECS must be an integer")?,
            min_hits: env_or("DESERIALIZER_CACHE_MIN_HITS", "100")
                .parse()
                .context("DESERIALIZER_CACHE_MIN_HITS must be an integer")?,
            fallback_account: env_or("DESERIALIZER_FALLBACK_ACCOUNT", "eosio.rex"),
            slow_fetch_ms: env_or("DESERIALIZER_SLOW_FETCH_MS", "10")
                .parse()
                .unwrap_or(10),
        };

        let config = Self {
            worker_id: env::var("DESERIALIZER_WORKER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            worker_queue,
            nats_url: env_or("NATS_URL", "nats://localhost:4222"),
            stream_name: env_or("DESERIALIZER_STREAM_NAME", "HYPERION"),
            max_deliver: env_or("DESERIALIZER_MAX_DELIVER", "10")
                .parse()
                .unwrap_or(10),
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            chain_api_url: env_or("NODEOS_HTTP", "http://127.0.0.1:8888"),
            prefetch: env_or("DESERIALIZER_PREFETCH", "100")
                .parse()
                .context("DESERIALIZER_PREFETCH must be an integer")?,
            index_partitions: env_or("DESERIALIZER_INDEX_PARTITIONS", "1")
                .parse()
                .context("DESERIALIZER_INDEX_PARTITIONS must be an integer")?,
            action_partition_ratio: env_or("DESERIALIZER_ACTION_PARTITION_RATIO", "1")
                .parse()
                .context("DESERIALIZER_ACTION_PARTITION_RATIO must be an integer")?,
            output_buffer: env_or("DESERIALIZER_OUTPUT_BUFFER", "1000")
                .parse()
                .unwrap_or(1000),
            chain,
            processing,
            cache,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chain.is_empty() {
            return Err(anyhow::anyhow!("Chain name cannot be empty"));
        }

        if self.chain.contains('.') || self.chain.contains('*') || self.chain.contains('>') {
            return Err(anyhow::anyhow!(
                "Chain name cannot contain subject tokens: {}",
                self.chain
            ));
        }

        if self.prefetch == 0 {
            return Err(anyhow::anyhow!("Prefetch must be greater than 0"));
        }

        if self.index_partitions == 0 || self.action_partition_ratio == 0 {
            return Err(anyhow::anyhow!(
                "Index partitions and action partition ratio must be greater than 0"
            ));
        }

        if self.output_buffer == 0 {
            return Err(anyhow::anyhow!("Output buffer must be greater than 0"));
        }

        if self.cache.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Cache sweep interval must be greater than 0"));
        }

        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }

    /// Durable consumer name for this worker's queue
    pub fn consumer_name(&self) -> String {
        format!("deserializer-{}", self.worker_queue.replace('.', "-"))
    }
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            fetch_block: true,
            fetch_traces: true,
            process_deltas: true,
            index_deltas: true,
            index_all_deltas: false,
            enable_indexing: true,
            abi_cache_mode: false,
            process_generated_transactions: false,
            stream_traces: false,
            stream_deltas: false,
            state: StateFlags::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 25,
            min_hits: 100,
            fallback_account: "eosio.rex".to_string(),
            slow_fetch_ms: 10,
        }
    }
}

impl Default for DeserializerConfig {
    fn default() -> Self {
        Self {
            chain: "eos".to_string(),
            worker_id: uuid::Uuid::new_v4().to_string(),
            worker_queue: block_queue("eos", 1),
            nats_url: "nats://localhost:4222".to_string(),
            stream_name: "HYPERION".to_string(),
            max_deliver: 10,
            redis_url: "redis://localhost:6379".to_string(),
            chain_api_url: "http://127.0.0.1:8888".to_string(),
            prefetch: 100,
            index_partitions: 1,
            action_partition_ratio: 1,
            output_buffer: 1000,
            processing: ProcessingOptions::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DESERIALIZER_CHAIN",
        "DESERIALIZER_WORKER_QUEUE",
        "DESERIALIZER_PREFETCH",
        "DESERIALIZER_INDEX_PARTITIONS",
        "DESERIALIZER_INDEX_ALL_DELTAS",
        "DESERIALIZER_VOTERS_STATE",
        "DESERIALIZER_CACHE_MIN_HITS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_env() {
        clear_env();
        let config = DeserializerConfig::from_env().unwrap();
        assert_eq!(config.chain, "eos");
        assert_eq!(config.worker_queue, "eos.blocks.1");
        assert_eq!(config.prefetch, 100);
        assert!(config.processing.process_deltas);
        assert!(!config.processing.index_all_deltas);
        assert_eq!(config.cache.min_hits, 100);
        assert_eq!(config.cache.fallback_account, "eosio.rex");
    }

    #[test]
    #[serial]
    fn test_overrides_from_env() {
        clear_env();
        env::set_var("DESERIALIZER_CHAIN", "wax");
        env::set_var("DESERIALIZER_PREFETCH", "20");
        env::set_var("DESERIALIZER_INDEX_PARTITIONS", "3");
        env::set_var("DESERIALIZER_INDEX_ALL_DELTAS", "true");
        env::set_var("DESERIALIZER_VOTERS_STATE", "1");

        let config = DeserializerConfig::from_env().unwrap();
        assert_eq!(config.chain, "wax");
        assert_eq!(config.worker_queue, "wax.blocks.1");
        assert_eq!(config.prefetch, 20);
        assert_eq!(config.index_partitions, 3);
        assert!(config.processing.index_all_deltas);
        assert!(config.processing.state.voters);
        assert!(!config.processing.state.proposals);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        clear_env();
        env::set_var("DESERIALIZER_PREFETCH", "lots");
        assert!(DeserializerConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_validate() {
        let mut config = DeserializerConfig::default();
        assert!(config.validate().is_ok());

        config.chain = "eos.main".to_string();
        assert!(config.validate().is_err());

        let mut config = DeserializerConfig::default();
        config.index_partitions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_consumer_name() {
        let config = DeserializerConfig::default();
        assert_eq!(config.consumer_name(), "deserializer-eos-blocks-1");
    }
}
