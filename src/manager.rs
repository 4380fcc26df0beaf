use crate::{
    allocator::{AllocationCoordinator, AllocationError, AllocationRequest},
    binding::{PortBinding, Protocol, ProtocolScope},
    config::{AllocatorConfig, PortRange},
    ledger::{LedgerError, PortLedger},
    release::deallocate_ports,
    stats::{PoolStats, read_pool_statistics},
};

/// Entry point for the orchestration layer: one manager per ledger
/// connection, all sharing the same immutable config.
#[derive(Debug)]
pub struct PortManager<L> {
    ledger: L,
    coordinator: AllocationCoordinator,
}

impl<L: PortLedger> PortManager<L> {
    pub fn new(ledger: L, config: &AllocatorConfig) -> Self {
        Self {
            ledger,
            coordinator: AllocationCoordinator::new(config),
        }
    }

    pub fn range(&self) -> PortRange {
        self.coordinator.range()
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn allocate_port_block(
        &mut self,
        request: &AllocationRequest,
    ) -> Result<Vec<PortBinding>, AllocationError> {
        self.coordinator.allocate(&mut self.ledger, request)
    }

    pub fn deallocate_ports(&mut self, host: &str, owner_id: &str) -> Result<usize, LedgerError> {
        deallocate_ports(&mut self.ledger, host, owner_id)
    }

    pub fn statistics(&mut self, host: &str) -> Result<PoolStats, LedgerError> {
        self.statistics_for(host, ProtocolScope::Both)
    }

    pub fn statistics_for(
        &mut self,
        host: &str,
        scope: ProtocolScope,
    ) -> Result<PoolStats, LedgerError> {
        read_pool_statistics(&mut self.ledger, self.coordinator.range(), host, scope)
    }

    /// `false` when `port` is outside the configured range or already bound
    /// for `protocol` on `host`.
    pub fn validate_port_availability(
        &mut self,
        host: &str,
        port: u16,
        protocol: Protocol,
    ) -> Result<bool, LedgerError> {
        if !self.coordinator.range().contains(port) {
            return Ok(false);
        }
        Ok(!self.ledger.is_bound(host, port, protocol)?)
    }

    pub fn list_bindings(&mut self, host: &str) -> Result<Vec<PortBinding>, LedgerError> {
        self.ledger.bindings_for_host(host)
    }
}
