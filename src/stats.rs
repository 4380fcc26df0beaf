use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    binding::{PortBinding, PortType, ProtocolScope},
    config::PortRange,
    finder::{largest_free_block, used_in_range},
    ledger::{LedgerError, PortLedger},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub host: String,
    pub total: u32,
    pub used: u32,
    pub available: u32,
    pub utilization_percent: f64,
    pub largest_free_block: u32,
    pub usage_by_type: BTreeMap<PortType, u32>,
}

/// Builds pool statistics from one snapshot of a host's bindings.
///
/// `used` counts distinct port numbers, so a port bound for both TCP and UDP
/// consumes one slot. `usage_by_type` counts binding rows and always lists
/// every port type.
pub fn pool_statistics(
    range: PortRange,
    host: &str,
    scope: ProtocolScope,
    bindings: &[PortBinding],
) -> PoolStats {
    let scoped = bindings
        .iter()
        .filter(|binding| binding.host == host && scope.includes(binding.protocol))
        .collect::<Vec<_>>();

    let used_ports = scoped
        .iter()
        .map(|binding| binding.port)
        .collect::<BTreeSet<_>>();

    let total = range.len();
    let used = used_in_range(range, &used_ports);

    let mut usage_by_type = PortType::ALL
        .into_iter()
        .map(|port_type| (port_type, 0))
        .collect::<BTreeMap<_, _>>();
    for binding in &scoped {
        *usage_by_type.entry(binding.port_type).or_default() += 1;
    }

    PoolStats {
        host: host.to_string(),
        total,
        used,
        available: total - used,
        utilization_percent: round_percent(used, total),
        largest_free_block: largest_free_block(range, &used_ports),
        usage_by_type,
    }
}

/// Reads the host's bindings in one statement and summarises them.
pub fn read_pool_statistics<L: PortLedger>(
    ledger: &mut L,
    range: PortRange,
    host: &str,
    scope: ProtocolScope,
) -> Result<PoolStats, LedgerError> {
    let bindings = ledger.bindings_for_host(host)?;
    Ok(pool_statistics(range, host, scope, &bindings))
}

fn round_percent(used: u32, total: u32) -> f64 {
    let percent = f64::from(used) / f64::from(total) * 100.0;
    (percent * 100.0).round() / 100.0
}
