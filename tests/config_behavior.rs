use std::{collections::HashMap, time::Duration};

use portblock::{
    binding::PortType,
    config::{AllocatorConfig, ConfigError, DEFAULT_ALLOCATION_TIMEOUT, PortRange, load_profiles},
};
use tempfile::tempdir;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<HashMap<_, _>>();
    move |key| vars.get(key).cloned()
}

#[test]
fn port_range_requires_start_below_end() {
    assert!(PortRange::new(20000, 20005).is_ok());
    assert!(matches!(
        PortRange::new(20005, 20005),
        Err(ConfigError::InvalidRange { .. })
    ));
    assert!(matches!(
        PortRange::new(30000, 20000),
        Err(ConfigError::InvalidRange { .. })
    ));
}

#[test]
fn port_range_len_counts_both_ends() {
    let range = PortRange::new(20000, 20005).unwrap();
    assert_eq!(range.len(), 6);
    assert!(!range.is_empty());
    assert!(range.contains(20000));
    assert!(range.contains(20005));
    assert!(!range.contains(20006));

    assert_eq!(PortRange::new(0, 65535).unwrap().len(), 65536);
}

#[test]
fn loads_range_from_environment() {
    let config = AllocatorConfig::load_with(
        None,
        env(&[("PORT_RANGE_START", "20000"), ("PORT_RANGE_END", "30000")]),
    )
    .unwrap();

    assert_eq!(config.port_range, PortRange::new(20000, 30000).unwrap());
    assert_eq!(config.allocation_timeout, DEFAULT_ALLOCATION_TIMEOUT);
    assert!(config.profiles.contains("RUST"));
}

#[test]
fn missing_or_partial_range_is_fatal() {
    let missing = AllocatorConfig::load_with(None, env(&[]));
    assert!(matches!(missing, Err(ConfigError::MissingRange)));

    let partial = AllocatorConfig::load_with(None, env(&[("PORT_RANGE_START", "20000")]));
    assert!(matches!(partial, Err(ConfigError::MissingRange)));
}

#[test]
fn non_numeric_or_inverted_range_is_fatal() {
    let garbage = AllocatorConfig::load_with(
        None,
        env(&[("PORT_RANGE_START", "abc"), ("PORT_RANGE_END", "30000")]),
    );
    assert!(matches!(garbage, Err(ConfigError::InvalidValue { .. })));

    let too_big = AllocatorConfig::load_with(
        None,
        env(&[("PORT_RANGE_START", "20000"), ("PORT_RANGE_END", "70000")]),
    );
    assert!(matches!(too_big, Err(ConfigError::InvalidValue { .. })));

    let inverted = AllocatorConfig::load_with(
        None,
        env(&[("PORT_RANGE_START", "30000"), ("PORT_RANGE_END", "20000")]),
    );
    assert!(matches!(inverted, Err(ConfigError::InvalidRange { .. })));
}

#[test]
fn config_file_supplies_range_timeout_and_profiles() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("portblock.toml");
    std::fs::write(
        &path,
        r#"
allocation_timeout_ms = 2500

[port_range]
start = 25000
end = 25099

[profiles.custom_arena]
count = 3
types = ["primary", "query", "spectator"]

[profiles.MINECRAFT]
count = 2
types = ["primary", "management"]
"#,
    )
    .unwrap();

    let config = AllocatorConfig::load_with(Some(path.as_path()), env(&[])).unwrap();

    assert_eq!(config.port_range, PortRange::new(25000, 25099).unwrap());
    assert_eq!(config.allocation_timeout, Duration::from_millis(2500));

    let arena = config.profiles.resolve("CUSTOM_ARENA");
    assert_eq!(
        arena.types,
        vec![PortType::Primary, PortType::Query, PortType::Spectator]
    );

    let minecraft = config.profiles.resolve("MINECRAFT");
    assert_eq!(minecraft.count, 2);
    assert_eq!(minecraft.types[1], PortType::Management);

    // Untouched built-ins survive the overlay.
    assert_eq!(config.profiles.resolve("RUST").count, 3);
}

#[test]
fn environment_overrides_file_range() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("portblock.toml");
    std::fs::write(&path, "[port_range]\nstart = 25000\nend = 25099\n").unwrap();

    let config = AllocatorConfig::load_with(
        Some(path.as_path()),
        env(&[("PORT_RANGE_START", "40000"), ("PORT_RANGE_END", "40010")]),
    )
    .unwrap();

    assert_eq!(config.port_range, PortRange::new(40000, 40010).unwrap());
}

#[test]
fn invalid_file_range_or_profile_is_rejected() {
    let dir = tempdir().unwrap();

    let inverted = dir.path().join("inverted.toml");
    std::fs::write(&inverted, "[port_range]\nstart = 25099\nend = 25000\n").unwrap();
    assert!(AllocatorConfig::load_with(Some(inverted.as_path()), env(&[])).is_err());

    let bad_profile = dir.path().join("bad_profile.toml");
    std::fs::write(&bad_profile, "[profiles.BROKEN]\ncount = 0\n").unwrap();
    assert!(matches!(
        load_profiles(Some(bad_profile.as_path())),
        Err(ConfigError::InvalidProfile { .. })
    ));
}

#[test]
fn profiles_load_without_a_port_range() {
    let table = load_profiles(None).unwrap();
    assert!(table.contains("ARK"));
    assert!(table.len() > 30);
}
