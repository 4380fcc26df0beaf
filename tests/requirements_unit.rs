use portblock::{
    binding::PortType,
    config::ConfigError,
    requirements::{PortRequirement, ProfileTable},
};

#[test]
fn every_builtin_profile_resolves_to_a_consistent_requirement() {
    let table = ProfileTable::builtin();
    assert!(!table.is_empty());
    table.validate().unwrap();

    for (profile, _) in table.iter() {
        let resolved = table.resolve(profile);
        assert!(resolved.count >= 1, "{profile}");
        assert_eq!(resolved.types.len(), usize::from(resolved.count), "{profile}");
    }
}

#[test]
fn known_profiles_keep_their_port_roles() {
    let table = ProfileTable::builtin();

    assert_eq!(
        table.resolve("RUST"),
        PortRequirement::new(3, &[PortType::Primary, PortType::Management, PortType::App])
    );
    assert_eq!(
        table.resolve("CS2"),
        PortRequirement::new(2, &[PortType::Primary, PortType::Spectator])
    );
    assert_eq!(
        table.resolve("MINECRAFT"),
        PortRequirement::new(1, &[PortType::Primary])
    );
    assert_eq!(
        table.resolve("UNTURNED"),
        PortRequirement::new(2, &[PortType::Primary, PortType::Management])
    );
}

#[test]
fn profile_lookup_ignores_case_and_whitespace() {
    let table = ProfileTable::builtin();
    assert_eq!(table.resolve(" valheim "), table.resolve("VALHEIM"));
    assert!(table.contains("terraria"));
}

#[test]
fn unknown_profile_falls_back_to_primary_and_query() {
    let table = ProfileTable::builtin();
    let resolved = table.resolve("NOT_A_GAME");

    assert_eq!(resolved.count, 2);
    assert_eq!(resolved.types, vec![PortType::Primary, PortType::Query]);
    assert_eq!(ProfileTable::empty().resolve("ANYTHING"), PortRequirement::fallback());
}

#[test]
fn short_type_lists_are_padded_with_primary() {
    let mut table = ProfileTable::empty();
    table
        .insert("modded", PortRequirement::new(4, &[PortType::Query]))
        .unwrap();

    let resolved = table.resolve("MODDED");
    assert_eq!(
        resolved.types,
        vec![
            PortType::Query,
            PortType::Primary,
            PortType::Primary,
            PortType::Primary
        ]
    );
}

#[test]
fn rejects_zero_count_and_overlong_type_lists() {
    let mut table = ProfileTable::empty();

    let zero = table.insert("EMPTY", PortRequirement::new(0, &[]));
    assert!(matches!(zero, Err(ConfigError::InvalidProfile { .. })));

    let overlong = table.insert(
        "TOO_MANY",
        PortRequirement::new(1, &[PortType::Primary, PortType::Query]),
    );
    assert!(matches!(overlong, Err(ConfigError::InvalidProfile { .. })));
    assert!(table.is_empty());
}
