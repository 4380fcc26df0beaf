use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::requirements::ProfileTable;

pub const PORT_RANGE_START_VAR: &str = "PORT_RANGE_START";
pub const PORT_RANGE_END_VAR: &str = "PORT_RANGE_END";
pub const DEFAULT_ALLOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Startup-only failures. None of these are recoverable at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port range {start}-{end}: start must be less than end")]
    InvalidRange { start: u16, end: u16 },
    #[error("missing port range: set PORT_RANGE_START and PORT_RANGE_END")]
    MissingRange,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("invalid profile {profile}: {reason}")]
    InvalidProfile { profile: String, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Inclusive port range managed on every host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRange", into = "RawRange")]
pub struct PortRange {
    start: u16,
    end: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ConfigError> {
        if start >= end {
            return Err(ConfigError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Reads `PORT_RANGE_START` / `PORT_RANGE_END` through `lookup`.
    /// Returns `Ok(None)` when neither is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let start = lookup(PORT_RANGE_START_VAR);
        let end = lookup(PORT_RANGE_END_VAR);

        match (start, end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Ok(Some(Self::new(
                parse_port(PORT_RANGE_START_VAR, &start)?,
                parse_port(PORT_RANGE_END_VAR, &end)?,
            )?)),
            _ => Err(ConfigError::MissingRange),
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn len(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// Always false: a valid range holds at least two ports.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl TryFrom<RawRange> for PortRange {
    type Error = ConfigError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl From<PortRange> for RawRange {
    fn from(range: PortRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    port_range: Option<RawRange>,
    allocation_timeout_ms: Option<u64>,
    #[serde(default)]
    profiles: ProfileTable,
}

/// Process-wide allocator settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub port_range: PortRange,
    pub allocation_timeout: Duration,
    pub profiles: ProfileTable,
}

impl AllocatorConfig {
    pub fn new(port_range: PortRange) -> Self {
        Self {
            port_range,
            allocation_timeout: DEFAULT_ALLOCATION_TIMEOUT,
            profiles: ProfileTable::builtin(),
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.allocation_timeout = timeout;
        self
    }

    /// Builds the config from the process environment and an optional TOML file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`AllocatorConfig::load`], with environment lookups routed through `lookup`.
    /// Environment values override the file's `[port_range]`.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = read_config_file(path)?;

        let port_range = match PortRange::from_lookup(lookup)? {
            Some(range) => range,
            None => file
                .port_range
                .ok_or(ConfigError::MissingRange)
                .and_then(PortRange::try_from)?,
        };

        let profiles = merge_profiles(&file)?;

        let allocation_timeout = file
            .allocation_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ALLOCATION_TIMEOUT);

        Ok(Self {
            port_range,
            allocation_timeout,
            profiles,
        })
    }
}

/// Built-in profiles overlaid with the `[profiles]` table of an optional
/// config file. Needs no port range.
pub fn load_profiles(path: Option<&Path>) -> Result<ProfileTable, ConfigError> {
    merge_profiles(&read_config_file(path)?)
}

fn read_config_file(path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        }
        None => Ok(ConfigFile::default()),
    }
}

fn merge_profiles(file: &ConfigFile) -> Result<ProfileTable, ConfigError> {
    let mut profiles = ProfileTable::builtin();
    for (profile, _) in file.profiles.iter() {
        if profiles.contains(profile) {
            tracing::debug!(profile, "config file overrides built-in profile");
        }
    }
    profiles.extend_from(&file.profiles)?;
    tracing::debug!(count = profiles.len(), "resolved profile table");
    Ok(profiles)
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
