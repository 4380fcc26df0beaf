//! Storage boundary for port bindings.
//!
//! The ledger is the only source of truth for which ports are in use.
//! Allocation reads and writes go through a [`LedgerTransaction`] so the
//! whole find-then-insert step commits or rolls back as one unit.

use std::{collections::BTreeSet, time::Duration};

use thiserror::Error;

use crate::binding::{PortBinding, Protocol, ProtocolScope};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("db: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("port {port}/{protocol} already bound on host {host}")]
    Duplicate {
        host: String,
        port: u16,
        protocol: Protocol,
    },
}

impl LedgerError {
    /// Lock timeouts, serialization failures and uniqueness violations all
    /// mean another writer got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Duplicate { .. })
    }
}

pub trait PortLedger {
    /// Opens a transaction with the strictest isolation the store supports,
    /// waiting at most `timeout` for competing writers.
    fn begin_serializable(
        &mut self,
        timeout: Duration,
    ) -> Result<Box<dyn LedgerTransaction + '_>, LedgerError>;

    /// Removes every binding `owner_id` holds on `host` in one atomic step.
    fn delete_owner(&mut self, host: &str, owner_id: &str) -> Result<usize, LedgerError>;

    fn bindings_for_host(&mut self, host: &str) -> Result<Vec<PortBinding>, LedgerError>;

    fn is_bound(&mut self, host: &str, port: u16, protocol: Protocol) -> Result<bool, LedgerError>;
}

/// Uncommitted work against a ledger. Dropping it without calling
/// [`LedgerTransaction::commit`] discards every staged write.
pub trait LedgerTransaction {
    /// Port numbers bound on `host` under any protocol `scope` includes.
    fn used_ports(&mut self, host: &str, scope: ProtocolScope) -> Result<BTreeSet<u16>, LedgerError>;

    fn write_batch(&mut self, bindings: &[PortBinding]) -> Result<(), LedgerError>;

    fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
