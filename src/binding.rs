use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Which protocols an allocation request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolScope {
    Tcp,
    Udp,
    Both,
}

/// Semantic role of a port inside a workload's block. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Primary,
    Query,
    Management,
    Spectator,
    App,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub port_type: PortType,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl ProtocolScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Both => "both",
        }
    }

    pub fn includes(self, protocol: Protocol) -> bool {
        match self {
            Self::Both => true,
            Self::Tcp => protocol == Protocol::Tcp,
            Self::Udp => protocol == Protocol::Udp,
        }
    }

    /// Protocol for the port at a given role. Dual-protocol requests put
    /// management ports on TCP and everything else on UDP.
    pub fn protocol_for(self, port_type: PortType) -> Protocol {
        match self {
            Self::Tcp => Protocol::Tcp,
            Self::Udp => Protocol::Udp,
            Self::Both if port_type == PortType::Management => Protocol::Tcp,
            Self::Both => Protocol::Udp,
        }
    }
}

impl PortType {
    pub const ALL: [PortType; 5] = [
        Self::Primary,
        Self::Query,
        Self::Management,
        Self::Spectator,
        Self::App,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Query => "query",
            Self::Management => "management",
            Self::Spectator => "spectator",
            Self::App => "app",
        }
    }
}

impl FromStr for Protocol {
    type Err = ParseEnumError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(ParseEnumError {
                kind: "protocol",
                value: input.to_string(),
            }),
        }
    }
}

impl FromStr for ProtocolScope {
    type Err = ParseEnumError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "both" => Ok(Self::Both),
            _ => Err(ParseEnumError {
                kind: "protocol scope",
                value: input.to_string(),
            }),
        }
    }
}

impl FromStr for PortType {
    type Err = ParseEnumError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        PortType::ALL
            .into_iter()
            .find(|port_type| port_type.as_str().eq_ignore_ascii_case(input))
            .ok_or_else(|| ParseEnumError {
                kind: "port type",
                value: input.to_string(),
            })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ProtocolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}
