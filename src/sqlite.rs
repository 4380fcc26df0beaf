use std::{collections::BTreeSet, path::Path, str::FromStr, time::Duration};

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior, params, types::Type};

use crate::{
    binding::{ParseEnumError, PortBinding, Protocol, ProtocolScope},
    config::DEFAULT_ALLOCATION_TIMEOUT,
    ledger::{LedgerError, LedgerTransaction, PortLedger},
};

/// Ledger backed by one SQLite database file.
///
/// Each worker opens its own `SqliteLedger` on the shared file. Allocation
/// transactions start with `BEGIN IMMEDIATE`, so at most one writer is past
/// its read of the used set at any time.
#[derive(Debug)]
pub struct SqliteLedger {
    conn: Connection,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS port_bindings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host TEXT NOT NULL,
        port INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
        protocol TEXT NOT NULL CHECK (protocol IN ('tcp', 'udp')),
        port_type TEXT NOT NULL,
        owner_id TEXT,
        UNIQUE (host, port, protocol)
    );
    CREATE INDEX IF NOT EXISTS idx_port_bindings_owner ON port_bindings(host, owner_id);
";

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(DEFAULT_ALLOCATION_TIMEOUT)?;
        // The pragma answers with the resulting mode, so it has to be read as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Inserts a binding outside any allocation, e.g. a reserved port with no owner.
    pub fn insert(&mut self, binding: &PortBinding) -> Result<(), LedgerError> {
        insert_binding(&self.conn, binding)
    }
}

impl PortLedger for SqliteLedger {
    fn begin_serializable(
        &mut self,
        timeout: Duration,
    ) -> Result<Box<dyn LedgerTransaction + '_>, LedgerError> {
        self.conn.busy_timeout(timeout)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    fn delete_owner(&mut self, host: &str, owner_id: &str) -> Result<usize, LedgerError> {
        self.conn
            .execute(
                "DELETE FROM port_bindings WHERE host = ?1 AND owner_id = ?2",
                params![host, owner_id],
            )
            .map_err(classify)
    }

    fn bindings_for_host(&mut self, host: &str) -> Result<Vec<PortBinding>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT host, port, protocol, port_type, owner_id
                FROM port_bindings
                WHERE host = ?1
                ORDER BY port ASC, protocol ASC
                ",
            )
            .map_err(classify)?;

        let rows = stmt
            .query_map(params![host], row_to_binding)
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(rows)
    }

    fn is_bound(&mut self, host: &str, port: u16, protocol: Protocol) -> Result<bool, LedgerError> {
        let bound = self
            .conn
            .query_row(
                "
                SELECT EXISTS (
                    SELECT 1 FROM port_bindings WHERE host = ?1 AND port = ?2 AND protocol = ?3
                )
                ",
                params![host, port, protocol.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(classify)?;
        Ok(bound)
    }
}

struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl LedgerTransaction for SqliteTransaction<'_> {
    fn used_ports(&mut self, host: &str, scope: ProtocolScope) -> Result<BTreeSet<u16>, LedgerError> {
        let mut stmt = self
            .tx
            .prepare("SELECT port, protocol FROM port_bindings WHERE host = ?1")
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![host], |row| {
                let protocol: String = row.get(1)?;
                Ok((row.get::<_, u16>(0)?, parse_column::<Protocol>(1, &protocol)?))
            })
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(rows
            .into_iter()
            .filter(|(_, protocol)| scope.includes(*protocol))
            .map(|(port, _)| port)
            .collect())
    }

    fn write_batch(&mut self, bindings: &[PortBinding]) -> Result<(), LedgerError> {
        for binding in bindings {
            insert_binding(&self.tx, binding)?;
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().map_err(classify)
    }
}

fn insert_binding(conn: &Connection, binding: &PortBinding) -> Result<(), LedgerError> {
    conn.execute(
        "
        INSERT INTO port_bindings (host, port, protocol, port_type, owner_id)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            binding.host,
            binding.port,
            binding.protocol.as_str(),
            binding.port_type.as_str(),
            binding.owner_id,
        ],
    )
    .map_err(|error| match error.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => LedgerError::Duplicate {
            host: binding.host.clone(),
            port: binding.port,
            protocol: binding.protocol,
        },
        _ => classify(error),
    })?;
    Ok(())
}

fn row_to_binding(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortBinding> {
    let protocol: String = row.get(2)?;
    let port_type: String = row.get(3)?;
    Ok(PortBinding {
        host: row.get(0)?,
        port: row.get(1)?,
        protocol: parse_column(2, &protocol)?,
        port_type: parse_column(3, &port_type)?,
        owner_id: row.get(4)?,
    })
}

fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    value
        .parse::<T>()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}

fn classify(error: rusqlite::Error) -> LedgerError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            LedgerError::Conflict(error.to_string())
        }
        _ => LedgerError::Db(error),
    }
}
