use std::path::PathBuf;

use portblock::{
    allocator::{AllocationError, AllocationRequest},
    binding::{Protocol, ProtocolScope},
    config::{AllocatorConfig, ConfigError, load_profiles},
    ledger::{LedgerError, PortLedger},
    logging,
    manager::PortManager,
    release::deallocate_ports,
    sqlite::SqliteLedger,
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
struct UsageError(String);

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        usage();
        std::process::exit(2);
    }

    logging::init_cli_logger(args.iter().any(|arg| arg == "--verbose"));

    let result = match args[0].as_str() {
        "allocate" => allocate(&args[1..]),
        "release" => release(&args[1..]),
        "stats" => stats(&args[1..]),
        "check" => check(&args[1..]),
        "list" => list(&args[1..]),
        "profiles" => profiles(&args[1..]),
        _ => {
            usage();
            std::process::exit(2);
        }
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(exit_code(&*error));
    }
}

fn allocate(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let host = required_arg(args, "--host")?;
    let profile = required_arg(args, "--profile")?;
    let scope = required_arg(args, "--protocol")?
        .parse::<ProtocolScope>()
        .map_err(|error| UsageError(error.to_string()))?;

    let mut request = AllocationRequest::new(&host, &profile, scope);
    if let Some(owner) = optional_arg(args, "--owner") {
        request = request.owned_by(&owner);
    }

    let mut manager = open_manager(args)?;
    let bindings = manager.allocate_port_block(&request)?;

    println!("{}", serde_json::to_string(&bindings)?);
    Ok(())
}

fn release(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let host = required_arg(args, "--host")?;
    let owner = required_arg(args, "--owner")?;

    let mut ledger = SqliteLedger::open(&db_path(args)?)?;
    let removed = deallocate_ports(&mut ledger, &host, &owner)?;

    println!(
        "{}",
        serde_json::json!({
            "host": host,
            "owner_id": owner,
            "removed": removed,
        })
    );
    Ok(())
}

fn stats(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let host = required_arg(args, "--host")?;
    let scope = match optional_arg(args, "--protocol") {
        Some(value) => value
            .parse::<ProtocolScope>()
            .map_err(|error| UsageError(error.to_string()))?,
        None => ProtocolScope::Both,
    };

    let mut manager = open_manager(args)?;
    let stats = manager.statistics_for(&host, scope)?;

    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn check(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let host = required_arg(args, "--host")?;
    let port = required_arg(args, "--port")?
        .parse::<u16>()
        .map_err(|error| UsageError(format!("invalid port: {error}")))?;
    let protocol = required_arg(args, "--protocol")?
        .parse::<Protocol>()
        .map_err(|error| UsageError(error.to_string()))?;

    let mut manager = open_manager(args)?;
    let available = manager.validate_port_availability(&host, port, protocol)?;

    println!(
        "{}",
        serde_json::json!({
            "host": host,
            "port": port,
            "protocol": protocol,
            "available": available,
        })
    );
    Ok(())
}

fn list(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let host = required_arg(args, "--host")?;
    let mut ledger = SqliteLedger::open(&db_path(args)?)?;
    let bindings = ledger.bindings_for_host(&host)?;

    println!("{}", serde_json::to_string(&bindings)?);
    Ok(())
}

fn profiles(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let config = optional_arg(args, "--config").map(PathBuf::from);
    let table = load_profiles(config.as_deref())?;

    let payload = table
        .iter()
        .map(|(profile, requirement)| {
            serde_json::json!({
                "profile": profile,
                "count": requirement.count,
                "types": requirement.padded_types(),
            })
        })
        .collect::<Vec<_>>();

    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn open_manager(args: &[String]) -> Result<PortManager<SqliteLedger>, Box<dyn std::error::Error>> {
    let config_path = optional_arg(args, "--config").map(PathBuf::from);
    // Configuration is validated before the ledger is opened.
    let config = AllocatorConfig::load(config_path.as_deref())?;
    let ledger = SqliteLedger::open(&db_path(args)?)?;
    Ok(PortManager::new(ledger, &config))
}

fn db_path(args: &[String]) -> Result<PathBuf, UsageError> {
    required_arg(args, "--db").map(PathBuf::from)
}

fn required_arg(args: &[String], key: &str) -> Result<String, UsageError> {
    let pos = args
        .iter()
        .position(|arg| arg == key)
        .ok_or_else(|| UsageError(format!("missing arg {key}")))?;
    let value = args
        .get(pos + 1)
        .ok_or_else(|| UsageError(format!("missing value for {key}")))?;
    if value.starts_with('-') {
        return Err(UsageError(format!("missing value for {key}")));
    }
    Ok(value.to_string())
}

fn optional_arg(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == key)
        .and_then(|pos| args.get(pos + 1))
        .map(ToString::to_string)
}

fn exit_code(error: &(dyn std::error::Error + 'static)) -> i32 {
    if error.is::<UsageError>() || error.is::<ConfigError>() {
        return 2;
    }
    if let Some(error) = error.downcast_ref::<AllocationError>() {
        return match error {
            AllocationError::InsufficientResources { .. } => 3,
            AllocationError::AllocationConflict { .. } => 4,
            AllocationError::Ledger(_) => 1,
        };
    }
    if error
        .downcast_ref::<LedgerError>()
        .is_some_and(LedgerError::is_conflict)
    {
        return 4;
    }
    1
}

fn usage() {
    eprintln!(
        "portctl allocate --db <path> --host <host> --profile <profile> --protocol <tcp|udp|both> [--owner <id>] [--config <file>]"
    );
    eprintln!("portctl release --db <path> --host <host> --owner <id>");
    eprintln!(
        "portctl stats --db <path> --host <host> [--protocol <tcp|udp|both>] [--config <file>]"
    );
    eprintln!(
        "portctl check --db <path> --host <host> --port <n> --protocol <tcp|udp> [--config <file>]"
    );
    eprintln!("portctl list --db <path> --host <host>");
    eprintln!("portctl profiles [--config <file>]");
    eprintln!("global: --verbose, PORT_RANGE_START / PORT_RANGE_END set the managed range");
}
