//! Capability resolution against the built-in and stubbed registries.

use crate::helpers::{StubRealProvider, builtin_report};
use std::sync::Arc;
use updogo::capability::CapabilityId;
use updogo::config::RobotConfig;
use updogo::resolver::{ModuleResolver, ProviderKind, Registry};

fn registry_with_unavailable(unavailable: &[CapabilityId]) -> Registry {
    let builtin = Registry::builtin().expect("builtin registry");
    let mut registry = Registry::new();
    for capability in CapabilityId::ALL {
        let fallback = Arc::clone(builtin.entry(capability).expect("registered").fallback());
        registry
            .register_fallback(Arc::clone(&fallback))
            .expect("fallback");
        registry
            .register_real(Arc::new(StubRealProvider {
                fallback,
                available: !unavailable.contains(&capability),
            }))
            .expect("real");
    }
    registry
}

#[test]
fn every_capability_resolves_even_when_everything_is_forced_off() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = crate::helpers::fallback_config(dir.path());
    let report = builtin_report(&config);

    for capability in CapabilityId::ALL {
        let resolution = report.resolution(capability).expect("resolved");
        assert_eq!(resolution.kind(), ProviderKind::Fallback);
        assert_eq!(resolution.reason(), Some("forced by configuration"));
    }
    assert!(report.is_degraded());
}

#[test]
fn status_lists_the_two_unavailable_capabilities() {
    let registry = registry_with_unavailable(&[CapabilityId::Stt, CapabilityId::Camera]);
    let config = RobotConfig::default();
    let status = ModuleResolver::new(&registry, &config)
        .resolve_all()
        .get_status();

    assert_eq!(
        status.active,
        vec![
            CapabilityId::Tts,
            CapabilityId::Emotion,
            CapabilityId::Nlp,
            CapabilityId::ImageSave
        ]
    );
    assert_eq!(status.fallback, vec![CapabilityId::Stt, CapabilityId::Camera]);
    assert_eq!(status.failures.len(), 2);
    assert!(status.failures[0].starts_with("stt: stub-real (not available"));
    assert!(status.failures[1].contains("unplugged"));
}

#[test]
fn resolution_is_repeatable() {
    let registry = registry_with_unavailable(&[CapabilityId::Nlp]);
    let config = RobotConfig::default();
    let resolver = ModuleResolver::new(&registry, &config);
    let first = resolver.resolve_all().get_status();
    let second = resolver.resolve_all().get_status();
    assert_eq!(first, second);
    assert!(resolver.is_degraded());
}

#[test]
fn status_serialises_for_the_host() {
    let registry = registry_with_unavailable(&[]);
    let status = ModuleResolver::new(&registry, &RobotConfig::default())
        .resolve_all()
        .get_status();
    let json = serde_json::to_value(&status).expect("json");
    assert_eq!(json["active"].as_array().map(Vec::len), Some(6));
    assert_eq!(json["fallback"], serde_json::json!([]));
    assert_eq!(json["active"][5], "image_save");
}
