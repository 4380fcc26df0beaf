use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    binding::{PortBinding, PortType, ProtocolScope},
    config::{AllocatorConfig, PortRange},
    finder::find_contiguous_block,
    ledger::{LedgerError, PortLedger},
    requirements::ProfileTable,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub host: String,
    pub profile: String,
    pub scope: ProtocolScope,
    pub owner_id: Option<String>,
}

impl AllocationRequest {
    pub fn new(host: &str, profile: &str, scope: ProtocolScope) -> Self {
        Self {
            host: host.to_string(),
            profile: profile.to_string(),
            scope,
            owner_id: None,
        }
    }

    pub fn owned_by(mut self, owner_id: &str) -> Self {
        self.owner_id = Some(owner_id.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("no contiguous block of {requested_size} ports available on host {host}")]
    InsufficientResources { host: String, requested_size: u16 },
    #[error("allocation on host {host} conflicted with a concurrent writer: {reason}")]
    AllocationConflict { host: String, reason: String },
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl AllocationError {
    /// Only conflicts are worth retrying; an exhausted pool fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AllocationConflict { .. })
    }

    fn from_ledger(host: &str, error: LedgerError) -> Self {
        if error.is_conflict() {
            Self::AllocationConflict {
                host: host.to_string(),
                reason: error.to_string(),
            }
        } else {
            Self::Ledger(error)
        }
    }
}

/// Finds and claims contiguous port blocks, one serializable transaction per call.
///
/// Holds no port usage between calls: every allocation re-reads the ledger
/// inside its own transaction.
#[derive(Debug, Clone)]
pub struct AllocationCoordinator {
    range: PortRange,
    timeout: Duration,
    profiles: ProfileTable,
}

impl AllocationCoordinator {
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            range: config.port_range,
            timeout: config.allocation_timeout,
            profiles: config.profiles.clone(),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn allocate<L: PortLedger>(
        &self,
        ledger: &mut L,
        request: &AllocationRequest,
    ) -> Result<Vec<PortBinding>, AllocationError> {
        let host = request.host.as_str();
        let requirement = self.profiles.resolve(&request.profile);

        let mut tx = ledger
            .begin_serializable(self.timeout)
            .map_err(|error| AllocationError::from_ledger(host, error))?;

        let used = tx
            .used_ports(host, request.scope)
            .map_err(|error| AllocationError::from_ledger(host, error))?;

        tracing::debug!(
            host,
            profile = %request.profile,
            scope = %request.scope,
            needed = requirement.count,
            used = used.len(),
            "searching for contiguous port block"
        );

        let Some(start) = find_contiguous_block(self.range, &used, requirement.count) else {
            tracing::warn!(
                host,
                requested_size = requirement.count,
                "no contiguous port block available"
            );
            // Dropping `tx` rolls back; nothing was written.
            return Err(AllocationError::InsufficientResources {
                host: host.to_string(),
                requested_size: requirement.count,
            });
        };

        let bindings = (0..requirement.count)
            .map(|offset| {
                let port_type = requirement
                    .types
                    .get(usize::from(offset))
                    .copied()
                    .unwrap_or(PortType::Primary);
                PortBinding {
                    host: host.to_string(),
                    port: start + offset,
                    protocol: request.scope.protocol_for(port_type),
                    port_type,
                    owner_id: request.owner_id.clone(),
                }
            })
            .collect::<Vec<_>>();

        let written = tx.write_batch(&bindings);
        written.and_then(|()| tx.commit()).map_err(|error| {
            let error = AllocationError::from_ledger(host, error);
            if error.is_retryable() {
                tracing::warn!(host, %error, "port allocation conflicted");
            }
            error
        })?;

        tracing::info!(
            host,
            owner = request.owner_id.as_deref().unwrap_or("-"),
            ports = %render_ports(&bindings),
            "allocated port block"
        );

        Ok(bindings)
    }
}

fn render_ports(bindings: &[PortBinding]) -> String {
    bindings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
