use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    binding::{PortBinding, Protocol, ProtocolScope},
    ledger::{LedgerError, LedgerTransaction, PortLedger},
};

/// In-process ledger. Clones share state, so one clone per thread behaves
/// like one connection per worker against a shared store.
///
/// Transactions claim hosts rather than the whole ledger: two transactions
/// touching different hosts never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    hosts: Mutex<HashMap<String, HostShard>>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct HostShard {
    bindings: Vec<PortBinding>,
    claimed: bool,
}

impl Shared {
    fn lock_hosts(&self) -> MutexGuard<'_, HashMap<String, HostShard>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a binding outside any allocation, e.g. a reserved port with no owner.
    pub fn insert(&self, binding: PortBinding) -> Result<(), LedgerError> {
        let mut hosts = self.shared.lock_hosts();
        let shard = hosts.entry(binding.host.clone()).or_default();
        ensure_unbound(&shard.bindings, &binding)?;
        shard.bindings.push(binding);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared
            .lock_hosts()
            .values()
            .map(|shard| shard.bindings.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PortLedger for MemoryLedger {
    fn begin_serializable(
        &mut self,
        timeout: Duration,
    ) -> Result<Box<dyn LedgerTransaction + '_>, LedgerError> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            deadline: Instant::now() + timeout,
            claimed: Vec::new(),
            staged: Vec::new(),
        }))
    }

    fn delete_owner(&mut self, host: &str, owner_id: &str) -> Result<usize, LedgerError> {
        let mut hosts = self.shared.lock_hosts();
        let Some(shard) = hosts.get_mut(host) else {
            return Ok(0);
        };

        let before = shard.bindings.len();
        shard
            .bindings
            .retain(|binding| binding.owner_id.as_deref() != Some(owner_id));
        Ok(before - shard.bindings.len())
    }

    fn bindings_for_host(&mut self, host: &str) -> Result<Vec<PortBinding>, LedgerError> {
        let hosts = self.shared.lock_hosts();
        let mut bindings = hosts
            .get(host)
            .map(|shard| shard.bindings.clone())
            .unwrap_or_default();
        bindings.sort_by_key(|binding| (binding.port, binding.protocol));
        Ok(bindings)
    }

    fn is_bound(&mut self, host: &str, port: u16, protocol: Protocol) -> Result<bool, LedgerError> {
        let hosts = self.shared.lock_hosts();
        Ok(hosts.get(host).is_some_and(|shard| {
            shard
                .bindings
                .iter()
                .any(|binding| binding.port == port && binding.protocol == protocol)
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    deadline: Instant,
    claimed: Vec<String>,
    staged: Vec<PortBinding>,
}

impl MemoryTransaction {
    /// Waits until no other transaction holds `host`, then holds it until drop.
    fn claim<'a>(
        &mut self,
        mut hosts: MutexGuard<'a, HashMap<String, HostShard>>,
        host: &str,
    ) -> Result<MutexGuard<'a, HashMap<String, HostShard>>, LedgerError> {
        if self.claimed.iter().any(|claimed| claimed == host) {
            return Ok(hosts);
        }

        loop {
            let shard = hosts.entry(host.to_string()).or_default();
            if !shard.claimed {
                shard.claimed = true;
                self.claimed.push(host.to_string());
                return Ok(hosts);
            }

            let now = Instant::now();
            if now >= self.deadline {
                return Err(LedgerError::Conflict(format!(
                    "timed out waiting for host {host}"
                )));
            }

            let (guard, _) = self
                .shared
                .released
                .wait_timeout(hosts, self.deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            hosts = guard;
        }
    }
}

impl LedgerTransaction for MemoryTransaction {
    fn used_ports(&mut self, host: &str, scope: ProtocolScope) -> Result<BTreeSet<u16>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let hosts = self.claim(shared.lock_hosts(), host)?;

        let committed = hosts
            .get(host)
            .map(|shard| shard.bindings.as_slice())
            .unwrap_or_default();

        Ok(committed
            .iter()
            .chain(self.staged.iter().filter(|binding| binding.host == host))
            .filter(|binding| scope.includes(binding.protocol))
            .map(|binding| binding.port)
            .collect())
    }

    fn write_batch(&mut self, bindings: &[PortBinding]) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let mut hosts = shared.lock_hosts();

        for binding in bindings {
            hosts = self.claim(hosts, &binding.host)?;
            if let Some(shard) = hosts.get(&binding.host) {
                ensure_unbound(&shard.bindings, binding)?;
            }
            ensure_unbound(&self.staged, binding)?;
            self.staged.push(binding.clone());
        }

        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        let staged = std::mem::take(&mut self.staged);
        let mut hosts = self.shared.lock_hosts();

        // Out-of-band inserts do not wait for claims; check the batch before applying any of it.
        for binding in &staged {
            if let Some(shard) = hosts.get(&binding.host) {
                ensure_unbound(&shard.bindings, binding)?;
            }
        }

        for binding in staged {
            hosts
                .entry(binding.host.clone())
                .or_default()
                .bindings
                .push(binding);
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.claimed.is_empty() {
            return;
        }

        let mut hosts = self.shared.lock_hosts();
        for host in self.claimed.drain(..) {
            if let Some(shard) = hosts.get_mut(&host) {
                shard.claimed = false;
            }
        }
        drop(hosts);
        self.shared.released.notify_all();
    }
}

fn ensure_unbound(existing: &[PortBinding], candidate: &PortBinding) -> Result<(), LedgerError> {
    let taken = existing.iter().any(|binding| {
        binding.host == candidate.host
            && binding.port == candidate.port
            && binding.protocol == candidate.protocol
    });

    if taken {
        return Err(LedgerError::Duplicate {
            host: candidate.host.clone(),
            port: candidate.port,
            protocol: candidate.protocol,
        });
    }
    Ok(())
}
