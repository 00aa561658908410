//! Tests for client domain types and wire parsing.

use rstest::rstest;

use super::{InstanceSpec, InstanceState, SpecError, UploadKind};

#[rstest]
#[case("off", InstanceState::Off)]
#[case("creating", InstanceState::Creating)]
#[case("on", InstanceState::On)]
#[case("rebooting", InstanceState::Rebooting)]
#[case("deleting", InstanceState::Deleting)]
#[case("error", InstanceState::Error)]
fn instance_state_parses_known_values(#[case] wire: &str, #[case] expected: InstanceState) {
    assert_eq!(InstanceState::from(wire), expected);
    assert_eq!(InstanceState::from(wire).as_str(), wire);
}

#[test]
fn instance_state_preserves_unknown_values() {
    let state = InstanceState::from("paused");
    assert_eq!(state, InstanceState::Unknown(String::from("paused")));
    assert_eq!(state.as_str(), "paused");
}

#[test]
fn upload_kind_maps_to_image_names() {
    assert_eq!(UploadKind::FvpConfig.image_name(), "config-file");
    assert_eq!(UploadKind::Application.image_name(), "application");
}

#[test]
fn spec_builder_trims_and_validates() {
    let spec = InstanceSpec::builder()
        .name("  dsp-tests ")
        .flavor("corstone-300fvp")
        .os("FastModels")
        .os_version("11.16.14")
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"));
    assert_eq!(spec.name, "dsp-tests");
}

#[rstest]
#[case("", "corstone-300fvp", "name")]
#[case("dsp-tests", "   ", "flavor")]
fn spec_builder_rejects_blank_fields(
    #[case] name: &str,
    #[case] flavor: &str,
    #[case] field: &str,
) {
    let result = InstanceSpec::builder()
        .name(name)
        .flavor(flavor)
        .os("FastModels")
        .os_version("11.16.14")
        .build();
    match result {
        Err(SpecError::Validation(missing)) => assert_eq!(missing, field),
        Ok(spec) => panic!("expected validation failure, built {spec:?}"),
    }
}
