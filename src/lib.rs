pub mod allocator;
pub mod binding;
pub mod config;
pub mod finder;
pub mod ledger;
pub mod logging;
pub mod manager;
pub mod memory;
pub mod release;
pub mod requirements;
pub mod sqlite;
pub mod stats;
