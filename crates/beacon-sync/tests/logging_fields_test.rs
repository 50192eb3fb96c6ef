//! Log call sites stay on the shared field-name schema.

use beacon_core::logging::ALL_FIELDS;

const SOURCES: &[(&str, &str)] = &[
    ("engine.rs", include_str!("../src/engine.rs")),
    ("gateway.rs", include_str!("../src/gateway.rs")),
    ("subscriber.rs", include_str!("../src/subscriber.rs")),
    ("memory.rs", include_str!("../src/memory.rs")),
    ("alerts.rs", include_str!("../src/alerts.rs")),
];

#[test]
fn test_every_schema_field_is_logged() {
    for field in ALL_FIELDS {
        let pattern = format!("{field} = ");
        let used = SOURCES.iter().any(|(_, source)| {
            source
                .match_indices(&pattern)
                .any(|(i, _)| i == 0 || matches!(source.as_bytes()[i - 1], b' ' | b'('))
        });
        assert!(used, "field {field} is not logged anywhere");
    }
}

#[test]
fn test_subsystem_values_match_schema() {
    let engine = SOURCES[0].1;
    let gateway = SOURCES[1].1;
    assert!(engine.contains("subsystem = \"sync\""));
    assert!(gateway.contains("subsystem = \"gateway\""));
}
