//! Table transform registry
//!
//! Handlers are keyed by a table pattern: an exact `code:table`, every table
//! of a code (`code:*`) or one table name under any code (`*:table`). Every
//! matching handler runs, exact patterns first, then code, then table.

pub mod asset;
pub mod documents;
pub mod handlers;

pub use asset::Asset;
pub use documents::*;

use crate::config::StateFlags;
use crate::error::TransformError;
use crate::schema::ContractSchema;
use crate::types::DeltaDocument;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Which rows a handler applies to. Variant order is match precedence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TablePattern {
    Exact { code: String, table: String },
    Code(String),
    Table(String),
}

impl TablePattern {
    pub fn exact(code: &str, table: &str) -> Self {
        TablePattern::Exact {
            code: code.to_string(),
            table: table.to_string(),
        }
    }

    pub fn code(code: &str) -> Self {
        TablePattern::Code(code.to_string())
    }

    pub fn table(table: &str) -> Self {
        TablePattern::Table(table.to_string())
    }

    pub fn matches(&self, code: &str, table: &str) -> bool {
        match self {
            TablePattern::Exact { code: c, table: t } => c == code && t == table,
            TablePattern::Code(c) => c == code,
            TablePattern::Table(t) => t == table,
        }
    }
}

impl fmt::Display for TablePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TablePattern::Exact { code, table } => write!(f, "{}:{}", code, table),
            TablePattern::Code(code) => write!(f, "{}:*", code),
            TablePattern::Table(table) => write!(f, "*:{}", table),
        }
    }
}

/// What a handler may consult while projecting a row
pub struct TransformContext<'a> {
    pub state: StateFlags,
    /// Built-in chain types, for nested records such as proposed transactions
    pub native: &'a ContractSchema,
}

/// A specialized projection for one family of table rows.
///
/// Implementations compute the whole projection before touching the row, so
/// a failed projection leaves the delta exactly as it was.
pub trait TableHandler: Send + Sync {
    fn pattern(&self) -> TablePattern;

    fn apply(
        &self,
        delta: &mut DeltaDocument,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<StateDocument>, TransformError>;
}

/// Result of running every matching handler over one row
#[derive(Debug, Default)]
pub struct TransformOutcome {
    /// At least one handler matched the row
    pub handled: bool,
    pub states: Vec<StateDocument>,
}

/// Handlers grouped by pattern
pub struct TransformRegistry {
    handlers: BTreeMap<TablePattern, Vec<Box<dyn TableHandler>>>,
}

impl TransformRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with every system contract handler.
    pub fn system() -> Self {
        let mut registry = Self::new();
        registry.register(handlers::VotersHandler);
        registry.register(handlers::GlobalHandler);
        registry.register(handlers::ProducersHandler);
        registry.register(handlers::UserResourcesHandler);
        registry.register(handlers::DelegatedBandwidthHandler);
        registry.register(handlers::ProposalHandler);
        registry.register(handlers::ApprovalsHandler);
        registry.register(handlers::ApprovalsV2Handler);
        registry.register(handlers::TokenAccountsHandler);
        registry
    }

    pub fn register<H: TableHandler + 'static>(&mut self, handler: H) {
        self.handlers
            .entry(handler.pattern())
            .or_default()
            .push(Box::new(handler));
    }

    /// Matching handlers in precedence order
    pub fn handlers_for(&self, code: &str, table: &str) -> Vec<&dyn TableHandler> {
        [
            TablePattern::exact(code, table),
            TablePattern::code(code),
            TablePattern::table(table),
        ]
        .iter()
        .filter_map(|pattern| self.handlers.get(pattern))
        .flatten()
        .map(|h| h.as_ref())
        .collect()
    }

    pub fn has_handler(&self, code: &str, table: &str) -> bool {
        self.handlers.keys().any(|p| p.matches(code, table))
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every matching handler. A failing handler is logged and skipped.
    pub fn transform(&self, delta: &mut DeltaDocument, ctx: &TransformContext<'_>) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();
        for handler in self.handlers_for(&delta.code, &delta.table) {
            outcome.handled = true;
            match handler.apply(delta, ctx) {
                Ok(Some(state)) => outcome.states.push(state),
                Ok(None) => {}
                Err(e) => warn!(
                    "Projection {} failed at block {} ({} {} {}): {}",
                    handler.pattern(),
                    delta.block_num,
                    delta.code,
                    delta.scope,
                    delta.primary_key,
                    e
                ),
            }
        }
        outcome
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
