//! Block processing: block documents, action traces and table deltas
//!
//! A batch succeeds only once every document it produced was published.
//! Schema, decode and projection failures degrade a record to its raw form
//! and never fail the batch.

use crate::config::ProcessingOptions;
use crate::decoder::{Decoder, RowData};
use crate::dedup::{assemble, dedupe, receipted, BlockMeta};
use crate::error::{DecodeError, PipelineError};
use crate::events::ControlSink;
use crate::router::Router;
use crate::transforms::{TransformContext, TransformRegistry};
use crate::types::{
    AbiUpdate, ActionTrace, BlockDocument, BlockPayload, DecodeErrorEvent, DeltaDocument,
    SignedBlock, TableDeltaV0,
};
use index_queues::{stream_events, IndexKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const SYSTEM_ACCOUNT: &str = "eosio";
const TOKEN_TABLE: &str = "accounts";

/// Per-block trace or delta handling slower than this is logged
const SLOW_BLOCK_STAGE: Duration = Duration::from_millis(10);

/// Documents produced while processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub blocks: usize,
    pub actions: usize,
    pub deltas: usize,
    pub states: usize,
    pub abis: usize,
    pub decode_errors: usize,
}

impl BlockStats {
    fn merge(&mut self, other: BlockStats) {
        self.blocks += other.blocks;
        self.actions += other.actions;
        self.deltas += other.deltas;
        self.states += other.states;
        self.abis += other.abis;
        self.decode_errors += other.decode_errors;
    }
}

/// Summary document of a fetched block
pub fn block_document(block_num: u32, block: &SignedBlock) -> BlockDocument {
    BlockDocument {
        timestamp: block.timestamp.clone(),
        block_num,
        producer: block.producer.clone(),
        new_producers: block.new_producers.clone(),
        schedule_version: block.schedule_version,
        cpu_usage: block.transactions.iter().map(|t| t.cpu_usage_us as u64).sum(),
        net_usage: block.transactions.iter().map(|t| t.net_usage_words as u64).sum(),
    }
}

pub struct BlockProcessor {
    options: ProcessingOptions,
    decoder: Arc<Decoder>,
    registry: Arc<TransformRegistry>,
    router: Arc<Router>,
    control: Arc<dyn ControlSink>,
    allow_streaming: Arc<AtomicBool>,
}

impl BlockProcessor {
    pub fn new(
        options: ProcessingOptions,
        decoder: Arc<Decoder>,
        registry: Arc<TransformRegistry>,
        router: Arc<Router>,
        control: Arc<dyn ControlSink>,
    ) -> Self {
        Self {
            options,
            decoder,
            registry,
            router,
            control,
            allow_streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runtime switch for the live stream, flipped by control messages
    pub fn allow_streaming(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.allow_streaming)
    }

    fn streaming(&self, per_kind: bool) -> bool {
        per_kind && self.allow_streaming.load(Ordering::Acquire)
    }

    /// Processes a batch and waits until all of its documents are published
    pub async fn process_batch(&self, payloads: &[BlockPayload]) -> Result<BlockStats, PipelineError> {
        let mut stats = BlockStats::default();
        for payload in payloads {
            stats.merge(self.process_block(payload).await?);
        }
        self.router.flush().await?;
        Ok(stats)
    }

    #[instrument(skip(self, payload), fields(block = payload.this_block.block_num))]
    pub async fn process_block(&self, payload: &BlockPayload) -> Result<BlockStats, PipelineError> {
        let block_num = payload.this_block.block_num;
        let mut stats = BlockStats::default();
        let mut meta = BlockMeta {
            block_num,
            ..Default::default()
        };

        if let Some(block) = &payload.block {
            meta.timestamp = Some(block.timestamp.clone());
            meta.producer = Some(block.producer.clone());
            if self.options.fetch_block {
                if self.options.enable_indexing {
                    self.router
                        .emit(IndexKind::Block, &block_document(block_num, block))
                        .await?;
                }
                stats.blocks += 1;
            }
        }

        if self.options.process_deltas {
            let started = Instant::now();
            for delta in &payload.deltas {
                stats.merge(self.process_delta(&delta.value, &meta).await?);
            }
            let elapsed = started.elapsed();
            if elapsed > SLOW_BLOCK_STAGE {
                warn!("Delta processing took {} ms on block {}", elapsed.as_millis(), block_num);
            }
        }

        if self.options.fetch_traces {
            let started = Instant::now();
            for trace in &payload.traces {
                let trx = &trace.value;
                if !trx.succeeded() {
                    continue;
                }
                let traces = receipted(trx);
                let raw: Vec<_> = traces.iter().map(|t| t.act.clone()).collect();
                let acts = self.decoder.decode_actions(&raw, block_num).await;
                for action in dedupe(assemble(trx, &traces, acts, &meta)) {
                    self.publish_action(&action).await?;
                    stats.actions += 1;
                }
            }
            let elapsed = started.elapsed();
            if elapsed > SLOW_BLOCK_STAGE {
                warn!("Trace processing took {} ms on block {}", elapsed.as_millis(), block_num);
            }
        }

        debug!("Block {} processed: {:?}", block_num, stats);
        Ok(stats)
    }

    async fn publish_action(&self, action: &ActionTrace) -> Result<(), PipelineError> {
        if self.options.enable_indexing {
            self.router.emit(IndexKind::Action, action).await?;
        }
        if self.streaming(self.options.stream_traces) {
            let headers = vec![
                ("event".to_string(), stream_events::TRACE.to_string()),
                ("account".to_string(), action.act.account.clone()),
                ("name".to_string(), action.act.name.clone()),
                ("notified".to_string(), action.notified.join(",")),
            ];
            self.router.stream(action, headers).await?;
        }
        Ok(())
    }

    async fn process_delta(&self, delta: &TableDeltaV0, meta: &BlockMeta) -> Result<BlockStats, PipelineError> {
        let mut stats = BlockStats::default();
        match delta.name.as_str() {
            "account" => {
                for row in &delta.rows {
                    if self.process_account_row(row.data.as_slice(), meta.block_num).await? {
                        stats.abis += 1;
                    }
                }
            }
            "contract_row" if !self.options.abi_cache_mode => {
                for row in &delta.rows {
                    stats.merge(
                        self.process_contract_row(row.present, row.data.as_slice(), meta)
                            .await?,
                    );
                }
            }
            "generated_transaction"
                if self.options.process_generated_transactions && !self.options.abi_cache_mode =>
            {
                for row in &delta.rows {
                    self.process_generated_transaction(row.data.as_slice(), meta.block_num)
                        .await;
                }
            }
            _ => {}
        }
        Ok(stats)
    }

    /// Publishes the schema carried by an `account` row, if any
    async fn process_account_row(&self, bytes: &[u8], block_num: u32) -> Result<bool, PipelineError> {
        let account = match self.decoder.decode_account_row(bytes) {
            Ok(account) => account,
            Err(e) => {
                warn!("Failed to decode account row at block {}: {}", block_num, e);
                return Ok(false);
            }
        };
        let Some(abi) = account.abi else {
            return Ok(false);
        };

        let update = AbiUpdate {
            account: account.name,
            block: block_num,
            abi: serde_json::to_string(&abi)?,
        };
        info!("New schema for {} at block {}", update.account, block_num);
        self.router.emit(IndexKind::Abi, &update).await?;
        self.control.save_abi(&update).await?;
        Ok(true)
    }

    /// Rows any handler matches are always eligible, with or without
    /// `index_all_deltas`
    fn eligible(&self, code: &str, table: &str) -> bool {
        self.options.index_all_deltas
            || code == SYSTEM_ACCOUNT
            || table == TOKEN_TABLE
            || self.registry.has_handler(code, table)
    }

    async fn process_contract_row(
        &self,
        present: bool,
        bytes: &[u8],
        meta: &BlockMeta,
    ) -> Result<BlockStats, PipelineError> {
        let mut stats = BlockStats::default();
        let row = match self.decoder.decode_contract_row(present, bytes) {
            Ok(row) => row,
            Err(e) => {
                warn!("Malformed contract row at block {}: {}", meta.block_num, e);
                return Ok(stats);
            }
        };
        if !self.eligible(&row.code, &row.table) {
            return Ok(stats);
        }

        let mut doc = DeltaDocument::from_row(&row, meta.block_num, meta.timestamp.clone());
        let mut states = Vec::new();
        match self
            .decoder
            .decode_table_row(&row.code, &row.table, meta.block_num, &row.value)
            .await
        {
            Ok(RowData::Decoded(data)) => {
                doc.data = Some(data);
                doc.value = None;
                let ctx = TransformContext {
                    state: self.options.state,
                    native: self.decoder.native(),
                };
                states = self.registry.transform(&mut doc, &ctx).states;
            }
            Ok(RowData::Raw(_)) => {}
            Err(DecodeError::Schema(e)) => {
                debug!("Row of {}:{} left encoded: {}", row.code, row.table, e);
            }
            Err(e) => {
                warn!(
                    "Failed to decode {}:{} row at block {}: {}",
                    row.code, row.table, meta.block_num, e
                );
                let event =
                    DecodeErrorEvent::delta(meta.block_num, &row.code, &row.table, e.to_string());
                self.control.decode_error(&event).await?;
                stats.decode_errors += 1;
            }
        }

        if self.options.enable_indexing {
            if self.options.index_deltas && doc.is_decoded() {
                self.router.emit(IndexKind::Delta, &doc).await?;
                stats.deltas += 1;
            }
            for state in &states {
                self.router.emit(state.kind(), state).await?;
                stats.states += 1;
            }
        }

        if self.streaming(self.options.stream_deltas) {
            let headers = vec![
                ("event".to_string(), stream_events::DELTA.to_string()),
                ("code".to_string(), doc.code.clone()),
                ("table".to_string(), doc.table.clone()),
            ];
            self.router.stream(&doc, headers).await?;
        }
        Ok(stats)
    }

    async fn process_generated_transaction(&self, bytes: &[u8], block_num: u32) {
        let row = match self.decoder.decode_generated_transaction(bytes) {
            Ok(row) => row,
            Err(e) => {
                warn!("Failed to decode generated transaction at block {}: {}", block_num, e);
                return;
            }
        };
        match self.decoder.process_deferred(row, block_num).await {
            Ok(Some(deferred)) => {
                let delay = deferred.get("delay_sec").and_then(|v| v.as_u64()).unwrap_or(0);
                if delay > 0 {
                    info!("Delayed transaction at block {}: {}", block_num, deferred);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to expand deferred transaction at block {}: {}", block_num, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionReceipt;

    #[test]
    fn test_block_document_sums_usage() {
        let block = SignedBlock {
            timestamp: "2020-01-01T00:00:00.000".to_string(),
            producer: "bp1".to_string(),
            schedule_version: 4,
            new_producers: None,
            transactions: vec![
                TransactionReceipt {
                    status: 0,
                    cpu_usage_us: 100,
                    net_usage_words: 10,
                },
                TransactionReceipt {
                    status: 0,
                    cpu_usage_us: 250,
                    net_usage_words: 6,
                },
            ],
        };
        let doc = block_document(7, &block);
        assert_eq!(doc.cpu_usage, 350);
        assert_eq!(doc.net_usage, 16);
        assert_eq!(doc.producer, "bp1");

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["@timestamp"], "2020-01-01T00:00:00.000");
        assert!(json.get("new_producers").is_none());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = BlockStats::default();
        total.merge(BlockStats {
            actions: 2,
            deltas: 1,
            ..Default::default()
        });
        total.merge(BlockStats {
            actions: 1,
            abis: 1,
            ..Default::default()
        });
        assert_eq!(total.actions, 3);
        assert_eq!(total.deltas, 1);
        assert_eq!(total.abis, 1);
    }
}
