use crate::ledger::{LedgerError, PortLedger};

/// Tears down every binding an owner holds on one host.
///
/// Repeating a teardown is safe: an owner with nothing left to remove
/// yields `0`, not an error.
pub fn deallocate_ports<L: PortLedger>(
    ledger: &mut L,
    host: &str,
    owner_id: &str,
) -> Result<usize, LedgerError> {
    let removed = ledger.delete_owner(host, owner_id)?;

    if removed == 0 {
        tracing::warn!(host, owner = owner_id, "no ports to deallocate");
    } else {
        tracing::info!(host, owner = owner_id, removed, "deallocated ports");
    }

    Ok(removed)
}
