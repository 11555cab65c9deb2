//! Action trace assembly and per-transaction deduplication
//!
//! A notified contract produces its own trace of the same action. Those
//! traces share the receipt digest and collapse into one canonical record
//! carrying every receipt.

use crate::types::{ActionTrace, ActionTraceV0, DecodedAction, TransactionTraceV0};
use std::collections::HashMap;

/// Block-level fields copied onto every action
#[derive(Debug, Clone, Default)]
pub struct BlockMeta {
    pub block_num: u32,
    pub timestamp: Option<String>,
    pub producer: Option<String>,
}

/// Action traces of `trx` that carry a receipt, in execution order
pub fn receipted(trx: &TransactionTraceV0) -> Vec<&ActionTraceV0> {
    trx.action_traces
        .iter()
        .map(|t| &t.value)
        .filter(|t| t.receipt.is_some())
        .collect()
}

/// Builds action records for the receipted traces of `trx`, pairing each
/// trace with its decoded act. Transaction CPU/NET usage lands on the
/// action with ordinal 1.
pub fn assemble(
    trx: &TransactionTraceV0,
    traces: &[&ActionTraceV0],
    acts: Vec<DecodedAction>,
    meta: &BlockMeta,
) -> Vec<ActionTrace> {
    traces
        .iter()
        .zip(acts)
        .filter_map(|(trace, act)| {
            let receipt = trace.receipt.as_ref()?.value.clone();
            let first = trace.action_ordinal == 1;
            Some(ActionTrace {
                timestamp: meta.timestamp.clone(),
                act,
                block_num: meta.block_num,
                producer: meta.producer.clone(),
                trx_id: trx.id.to_lowercase(),
                action_ordinal: trace.action_ordinal,
                creator_action_ordinal: trace.creator_action_ordinal,
                global_sequence: receipt.global_sequence,
                notified: Vec::new(),
                code_sequence: None,
                abi_sequence: None,
                receipts: vec![receipt.into()],
                account_ram_deltas: trace.account_ram_deltas.clone(),
                console: trace.console.clone(),
                except: trace.except.clone(),
                elapsed: trace.elapsed,
                context_free: trace.context_free,
                cpu_usage_us: first.then_some(trx.cpu_usage_us),
                net_usage_words: first.then_some(trx.net_usage_words),
            })
        })
        .collect()
}

/// Collapses traces of one transaction that share a receipt digest.
///
/// The first trace of each digest group is kept and receives the receipts of
/// the whole group, the unique receivers as `notified` and the code and schema
/// sequences of the group's last receipt. Output follows first-seen order.
pub fn dedupe(traces: Vec<ActionTrace>) -> Vec<ActionTrace> {
    let mut canonical: Vec<ActionTrace> = Vec::with_capacity(traces.len());
    let mut by_digest: HashMap<String, usize> = HashMap::new();

    for mut trace in traces {
        let Some(digest) = trace.digest().map(str::to_string) else {
            continue;
        };
        match by_digest.get(&digest) {
            Some(&index) => canonical[index].receipts.append(&mut trace.receipts),
            None => {
                by_digest.insert(digest, canonical.len());
                canonical.push(trace);
            }
        }
    }

    for trace in &mut canonical {
        let mut notified: Vec<String> = Vec::new();
        for receipt in &trace.receipts {
            if !notified.contains(&receipt.receiver) {
                notified.push(receipt.receiver.clone());
            }
        }
        trace.notified = notified;
        if let Some(last) = trace.receipts.last() {
            trace.code_sequence = Some(last.code_sequence);
            trace.abi_sequence = Some(last.abi_sequence);
        }
    }
    canonical
}
