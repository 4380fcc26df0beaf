use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{binding::PortType, config::ConfigError};

/// How many ports a profile needs and the role of each, in block order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequirement {
    pub count: u16,
    #[serde(default)]
    pub types: Vec<PortType>,
}

impl PortRequirement {
    pub fn new(count: u16, types: &[PortType]) -> Self {
        Self {
            count,
            types: types.to_vec(),
        }
    }

    /// Fallback for profiles the table does not know.
    pub fn fallback() -> Self {
        Self::new(2, &[PortType::Primary, PortType::Query])
    }

    pub fn validate(&self, profile: &str) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::InvalidProfile {
                profile: profile.to_string(),
                reason: "count must be at least 1".to_string(),
            });
        }
        if self.types.len() > usize::from(self.count) {
            return Err(ConfigError::InvalidProfile {
                profile: profile.to_string(),
                reason: format!(
                    "{} port types listed for a count of {}",
                    self.types.len(),
                    self.count
                ),
            });
        }
        Ok(())
    }

    /// Type list padded with `primary` up to `count`.
    pub fn padded_types(&self) -> Vec<PortType> {
        (0..usize::from(self.count))
            .map(|idx| self.types.get(idx).copied().unwrap_or(PortType::Primary))
            .collect()
    }
}

/// Profile key -> port requirement lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: BTreeMap<String, PortRequirement>,
}

impl ProfileTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stock per-game table.
    pub fn builtin() -> Self {
        use PortType::{App, Management, Primary, Query, Spectator};

        let two = |second| PortRequirement::new(2, &[Primary, second]);
        let one = || PortRequirement::new(1, &[Primary]);

        let entries = [
            ("ARK", two(Query)),
            ("ARK_SURVIVAL_ASCENDED", two(Query)),
            ("RUST", PortRequirement::new(3, &[Primary, Management, App])),
            ("MINECRAFT", one()),
            ("CS2", two(Spectator)),
            ("PALWORLD", two(Query)),
            ("ATLAS", two(Query)),
            ("SATISFACTORY", two(Query)),
            ("THE_FOREST", two(Query)),
            ("SONS_OF_THE_FOREST", two(Query)),
            ("SEVEN_DAYS_TO_DIE", two(Query)),
            ("VALHEIM", two(Query)),
            ("PROJECT_ZOMBOID", two(Query)),
            ("FACTORIO", one()),
            ("TERRARIA", one()),
            ("UNTURNED", two(Management)),
            ("STARBOUND", two(Query)),
            ("ECO", two(Query)),
            ("BAROTRAUMA", two(Query)),
            ("GARRYS_MOD", two(Query)),
            ("DAYZ", two(Query)),
            ("ARMA3", two(Query)),
            ("V_RISING", two(Query)),
            ("ENSHROUDED", two(Query)),
            ("MORDHAU", two(Query)),
            ("INSURGENCY_SANDSTORM", two(Query)),
            ("STATIONEERS", two(Query)),
            ("SCUM", two(Query)),
            ("CONAN_EXILES", two(Query)),
            ("RAINBOW_SIX_SIEGE", two(Query)),
            ("HELL_LET_LOOSE", two(Query)),
            ("FOXHOLE", two(Query)),
            ("READY_OR_NOT", two(Query)),
            ("DEEP_ROCK_GALACTIC", two(Query)),
            ("SPACE_ENGINEERS", two(Query)),
            ("STARDEW_VALLEY", one()),
        ];

        Self {
            profiles: entries
                .into_iter()
                .map(|(key, requirement)| (key.to_string(), requirement))
                .collect(),
        }
    }

    pub fn insert(&mut self, profile: &str, requirement: PortRequirement) -> Result<(), ConfigError> {
        let key = normalize_profile(profile);
        requirement.validate(&key)?;
        self.profiles.insert(key, requirement);
        Ok(())
    }

    /// Copies every entry of `other` over this table.
    pub fn extend_from(&mut self, other: &ProfileTable) -> Result<(), ConfigError> {
        for (profile, requirement) in &other.profiles {
            self.insert(profile, requirement.clone())?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profiles
            .iter()
            .try_for_each(|(profile, requirement)| requirement.validate(profile))
    }

    /// Requirement for `profile`, with `types.len() == count`. Unknown
    /// profiles get [`PortRequirement::fallback`].
    pub fn resolve(&self, profile: &str) -> PortRequirement {
        let requirement = self
            .profiles
            .get(&normalize_profile(profile))
            .cloned()
            .unwrap_or_else(PortRequirement::fallback);

        PortRequirement {
            types: requirement.padded_types(),
            count: requirement.count,
        }
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.profiles.contains_key(&normalize_profile(profile))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PortRequirement)> {
        self.profiles
            .iter()
            .map(|(profile, requirement)| (profile.as_str(), requirement))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn normalize_profile(profile: &str) -> String {
    profile.trim().to_ascii_uppercase()
}
