use super::prelude::*;
use super::serialized::{SerializedCircuit, circuits_equal};
use super::signals;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};

fn add_definition() -> Definition {
    signals::binary_definition("add", "AddComponent")
}

fn single(output: ComponentOutput) -> ComponentInput {
    ComponentInput::Single(output)
}

fn wire<const N: usize>(pairs: [(&str, ComponentOutput); N]) -> Vec<(SmolStr, ComponentInput)> {
    pairs
        .into_iter()
        .map(|(name, output)| (name.into(), single(output)))
        .collect()
}

/// Externals `a`, `b`, `c` and components `ab = a + b`, `abc = ab + c`.
fn wide_circuit() -> Circuit {
    let mut circuit = Circuit::new();
    circuit.add_definition("add", add_definition()).unwrap();
    let a = circuit.get_external("a", "double", false).unwrap().output();
    let b = circuit.get_external("b", "double", false).unwrap().output();
    let c = circuit.get_external("c", "double", false).unwrap().output();
    let ab = circuit
        .make_component("add", "ab", wire([("a", a.clone()), ("b", b.clone())]))
        .unwrap()
        .output(None)
        .unwrap();
    circuit
        .make_component("add", "abc", wire([("a", ab), ("b", c.clone())]))
        .unwrap();
    circuit
        .add_call_struct("AB", CallStruct::from_fields([("a", "double"), ("b", "double")]))
        .unwrap();
    circuit
        .add_call_struct("C", CallStruct::from_fields([("c", "double")]))
        .unwrap();
    circuit
        .add_call_group("trigger_ab", CallGroup {
            struct_name: "AB".into(),
            external_field_mapping: BTreeMap::from([("a".into(), "a".into()), ("b".into(), "b".into())]),
        })
        .unwrap();
    circuit
        .add_call_group("trigger_c", CallGroup {
            struct_name: "C".into(),
            external_field_mapping: BTreeMap::from([("c".into(), "c".into())]),
        })
        .unwrap();
    circuit
}

mod builder {
    use super::*;

    #[test]
    fn empty_circuit_is_valid() {
        let circuit = Circuit::new();
        circuit.validate().unwrap();
        assert!(circuit.components().is_empty());
        assert!(circuit.externals().is_empty());
    }

    #[test]
    fn externals_are_idempotent_per_request() {
        let mut circuit = Circuit::new();
        let first = circuit.get_external("md", "Update", true).unwrap().index;
        let again = circuit.get_external("md", "Update", true).unwrap().index;
        assert_eq!(first, again);
        assert!(matches!(
            circuit.get_external("md", "Update", false),
            Err(CircuitError::ExternalMismatch { .. })
        ));
        assert!(matches!(
            circuit.get_external("md", "Snapshot", true),
            Err(CircuitError::ExternalMismatch { .. })
        ));
        let next = circuit.get_external("md2", "Update", false).unwrap().index;
        assert_eq!(next, 1);
    }

    #[test]
    fn definitions_are_idempotent_per_value() {
        let mut circuit = Circuit::new();
        circuit.add_definition("add", add_definition()).unwrap();
        circuit.add_definition("add", add_definition()).unwrap();
        assert!(matches!(
            circuit.add_definition("add", signals::binary_definition("sub", "SubComponent")),
            Err(CircuitError::DefinitionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_definition_is_rejected() {
        let mut circuit = Circuit::new();
        assert!(matches!(
            circuit.make_component("nope", "c", []),
            Err(CircuitError::UnknownDefinition { .. })
        ));
    }

    #[test]
    fn equal_reinsert_coalesces() {
        let mut circuit = wide_circuit();
        let before = circuit.components().len();
        let a = circuit.external("a").unwrap().output();
        let b = circuit.external("b").unwrap().output();
        let again = circuit
            .make_component("add", "ab", wire([("a", a), ("b", b)]))
            .unwrap();
        assert_eq!(again.name, "ab");
        assert_eq!(circuit.components().len(), before);
    }

    #[test]
    fn same_name_different_wiring_is_rejected() {
        let mut circuit = wide_circuit();
        let a = circuit.external("a").unwrap().output();
        let c = circuit.external("c").unwrap().output();
        assert!(matches!(
            circuit.make_component("add", "ab", wire([("a", a), ("b", c)])),
            Err(CircuitError::DuplicateInsert { .. })
        ));
    }

    #[test]
    fn same_structure_coalesces_and_merges_options() {
        let mut circuit = wide_circuit();
        let a = circuit.external("a").unwrap().output();
        let b = circuit.external("b").unwrap().output();
        let merged = circuit
            .make_component_with(
                "add",
                "ab_again",
                wire([("a", a), ("b", b)]),
                ComponentConfig {
                    output_options: BTreeMap::from([("out".into(), OutputOptions {
                        force_stored: true,
                        block_propagation: false,
                    })]),
                    ..ComponentConfig::default()
                },
            )
            .unwrap();
        assert_eq!(merged.name, "ab");
        assert!(merged.options(None).unwrap().force_stored);
        assert!(circuit.component("ab_again").is_none());
    }

    #[test]
    fn force_insert_keeps_both() {
        let mut circuit = wide_circuit();
        let a = circuit.external("a").unwrap().output();
        let b = circuit.external("b").unwrap().output();
        let before = circuit.components().len();
        let forced = circuit
            .make_component_with(
                "add",
                "ab_forced",
                wire([("a", a), ("b", b)]),
                ComponentConfig {
                    force_insert: true,
                    ..ComponentConfig::default()
                },
            )
            .unwrap();
        assert_eq!(forced.name, "ab_forced");
        assert_eq!(circuit.components().len(), before + 1);
    }

    #[test]
    fn rename_rules() {
        let mut circuit = wide_circuit();
        assert!(matches!(
            circuit.rename_component("nope", "other"),
            Err(CircuitError::Rename(_))
        ));
        assert!(matches!(
            circuit.rename_component("abc", "ab"),
            Err(CircuitError::Rename(_))
        ));
        // `ab` feeds `abc`, so it cannot be renamed
        assert!(matches!(
            circuit.rename_component("ab", "sum_ab"),
            Err(CircuitError::Rename(_))
        ));
        circuit.rename_component("abc", "sum_abc").unwrap();
        assert!(circuit.component("abc").is_none());
        assert_eq!(circuit.component("sum_abc").unwrap().name, "sum_abc");
        circuit.rename_component("sum_abc", "sum_abc").unwrap();
        circuit.validate().unwrap();
    }

    #[test]
    fn call_group_type_mismatch_is_rejected() {
        let mut circuit = wide_circuit();
        circuit
            .add_call_struct("Bad", CallStruct::from_fields([("a", "int")]))
            .unwrap();
        assert!(matches!(
            circuit.add_call_group("bad", CallGroup {
                struct_name: "Bad".into(),
                external_field_mapping: BTreeMap::from([("a".into(), "a".into())]),
            }),
            Err(CircuitError::CallGroupTypeMismatch { .. })
        ));
        assert!(matches!(
            circuit.add_call_group("bad", CallGroup {
                struct_name: "Missing".into(),
                external_field_mapping: BTreeMap::new(),
            }),
            Err(CircuitError::UnknownCallStruct { .. })
        ));
        assert!(matches!(
            circuit.add_call_group("trigger_ab", CallGroup {
                struct_name: "AB".into(),
                external_field_mapping: BTreeMap::new(),
            }),
            Err(CircuitError::DuplicateCallGroup { .. })
        ));
    }

    #[test]
    fn validation_is_idempotent() {
        let circuit = wide_circuit();
        circuit.validate().unwrap();
        circuit.validate().unwrap();
    }
}

mod invariants {
    use super::*;

    #[test]
    fn missing_input_is_rejected() {
        let mut circuit = Circuit::new();
        circuit.add_definition("add", add_definition()).unwrap();
        let a = circuit.get_external("a", "double", false).unwrap().output();
        assert!(matches!(
            circuit.make_component("add", "half", wire([("a", a)])),
            Err(CircuitError::Component(ComponentError::MissingInput { .. }))
        ));
    }

    #[test]
    fn optional_and_unused_inputs_are_permitted() {
        let mut circuit = Circuit::new();
        let definition = Definition {
            class_name: "DoubleParameter".into(),
            header: "signals/parameter.hh".into(),
            inputs: BTreeMap::from([("a".into(), InputSpec::Single {
                meta: InputMetadata {
                    optional: true,
                    allow_unused: true,
                    ..InputMetadata::default()
                },
            })]),
            output_specs: BTreeMap::from([("out".into(), {
                let mut spec = OutputSpec::new("Output");
                spec.always_valid = true;
                spec
            })]),
            ..Definition::default()
        };
        circuit.add_definition("parameter", definition).unwrap();
        circuit.make_component("parameter", "width", []).unwrap();
        circuit.validate().unwrap();
    }

    #[test]
    fn unknown_sources_are_rejected() {
        let mut circuit = Circuit::new();
        circuit.add_definition("add", add_definition()).unwrap();
        let a = circuit.get_external("a", "double", false).unwrap().output();
        assert!(matches!(
            circuit.make_component(
                "add",
                "bad",
                wire([("a", a.clone()), ("b", ComponentOutput::external("ghost"))]),
            ),
            Err(CircuitError::Component(ComponentError::UnknownSource { .. }))
        ));
        assert!(matches!(
            circuit.make_component(
                "add",
                "bad",
                wire([("a", a), ("b", ComponentOutput::graph("ghost", "out"))]),
            ),
            Err(CircuitError::Component(ComponentError::UnknownSource { .. }))
        ));
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let mut circuit = Circuit::new();
        let definition = Definition {
            class_name: "TreeSum".into(),
            header: "signals/tree_sum.hh".into(),
            inputs: BTreeMap::from([("vals".into(), InputSpec::Array {
                fields: BTreeSet::from(["x".into()]),
                meta: InputMetadata::default(),
            })]),
            output_specs: BTreeMap::from([("out".into(), OutputSpec::new("Output"))]),
            generic_callset: Some(CallSpec {
                written_set: BTreeSet::from(["vals".into()]),
                outputs: BTreeSet::from(["out".into()]),
                callback: Some("call".into()),
                ..CallSpec::default()
            }),
            ..Definition::default()
        };
        circuit.add_definition("tree_sum", definition).unwrap();
        let a = circuit.get_external("a", "double", false).unwrap().output();
        let batches = ComponentInput::Array(vec![
            BTreeMap::from([("x".into(), a.clone())]),
            BTreeMap::from([("x".into(), a.clone())]),
        ]);
        assert!(matches!(
            circuit.make_component("tree_sum", "sum", [("vals".into(), batches)]),
            Err(CircuitError::Component(ComponentError::DuplicateSource { .. }))
        ));
        // distinct sources with the right fields are fine
        let b = circuit.get_external("b", "double", false).unwrap().output();
        let batches = ComponentInput::Array(vec![
            BTreeMap::from([("x".into(), a.clone())]),
            BTreeMap::from([("x".into(), b)]),
        ]);
        circuit
            .make_component("tree_sum", "sum", [("vals".into(), batches)])
            .unwrap();
        // wrong batch fields are not
        let c = circuit.get_external("c", "double", false).unwrap().output();
        let batches = ComponentInput::Array(vec![BTreeMap::from([("y".into(), c)])]);
        assert!(matches!(
            circuit.make_component("tree_sum", "sum2", [("vals".into(), batches)]),
            Err(CircuitError::Component(ComponentError::BatchFieldMismatch { .. }))
        ));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut circuit = Circuit::new();
        circuit.add_definition("add", add_definition()).unwrap();
        let a = circuit.get_external("a", "double", false).unwrap().output();
        let b = circuit.get_external("b", "double", false).unwrap().output();
        let batches = ComponentInput::Array(vec![BTreeMap::from([("a".into(), a)])]);
        assert!(matches!(
            circuit.make_component("add", "bad", [("a".into(), batches), ("b".into(), single(b))]),
            Err(CircuitError::Component(ComponentError::InputShapeMismatch { .. }))
        ));
    }

    #[test]
    fn always_valid_inputs_need_always_valid_sources() {
        let mut circuit = Circuit::new();
        let definition = Definition {
            class_name: "Normalizer".into(),
            header: "signals/normalizer.hh".into(),
            inputs: BTreeMap::from([("a".into(), InputSpec::Single {
                meta: InputMetadata {
                    always_valid: true,
                    ..InputMetadata::default()
                },
            })]),
            output_specs: BTreeMap::from([("out".into(), OutputSpec::new("Output"))]),
            generic_callset: Some(CallSpec {
                written_set: BTreeSet::from(["a".into()]),
                outputs: BTreeSet::from(["out".into()]),
                callback: Some("call".into()),
                ..CallSpec::default()
            }),
            ..Definition::default()
        };
        circuit.add_definition("normalizer", definition).unwrap();
        circuit.make_constant("double", Some("2.0")).unwrap();
        let constant = circuit.components()[0].output(None).unwrap();
        circuit
            .make_component("normalizer", "norm", wire([("a", constant)]))
            .unwrap();

        // externals are never always-valid
        let ext = circuit.get_external("raw", "double", false).unwrap().output();
        assert!(matches!(
            circuit.make_component("normalizer", "norm_ext", wire([("a", ext)])),
            Err(CircuitError::Component(ComponentError::SourceNotAlwaysValid { .. }))
        ));

        // neither is a plain component output
        let norm = circuit.component("norm").unwrap().output(None).unwrap();
        assert!(matches!(
            circuit.make_component("normalizer", "norm2", wire([("a", norm)])),
            Err(CircuitError::Component(ComponentError::SourceNotAlwaysValid { .. }))
        ));
    }

    #[test]
    fn force_stored_on_assume_invalid_is_rejected() {
        let mut circuit = Circuit::new();
        let mut spec = OutputSpec::new("Output");
        spec.ephemeral = true;
        spec.assume_invalid = true;
        let definition = Definition {
            class_name: "EdgeTrigger".into(),
            header: "signals/edge.hh".into(),
            inputs: BTreeMap::from([("a".into(), InputSpec::single())]),
            output_specs: BTreeMap::from([("out".into(), spec)]),
            generic_callset: Some(CallSpec {
                written_set: BTreeSet::from(["a".into()]),
                outputs: BTreeSet::from(["out".into()]),
                callback: Some("call".into()),
                ..CallSpec::default()
            }),
            ..Definition::default()
        };
        circuit.add_definition("edge", definition).unwrap();
        let a = circuit.get_external("a", "double", false).unwrap().output();
        assert!(matches!(
            circuit.make_component_with(
                "edge",
                "edge0",
                wire([("a", a)]),
                ComponentConfig {
                    output_options: BTreeMap::from([("out".into(), OutputOptions {
                        force_stored: true,
                        block_propagation: false,
                    })]),
                    ..ComponentConfig::default()
                },
            ),
            Err(CircuitError::Component(ComponentError::ForceStoredAssumeInvalid { .. }))
        ));
    }

    #[test]
    fn observed_must_trigger_is_rejected() {
        let mut circuit = Circuit::new();
        let definition = Definition {
            class_name: "BookFair".into(),
            header: "signals/book.hh".into(),
            inputs: BTreeMap::from([
                ("book".into(), InputSpec::single()),
                ("fair".into(), InputSpec::single()),
            ]),
            output_specs: BTreeMap::from([("out".into(), OutputSpec::new("Output"))]),
            callsets: BTreeSet::from([CallSpec {
                written_set: BTreeSet::from(["book".into()]),
                observes: BTreeSet::from(["fair".into()]),
                outputs: BTreeSet::from(["out".into()]),
                callback: Some("on_book".into()),
                ..CallSpec::default()
            }]),
            ..Definition::default()
        };
        circuit.add_definition("book_fair", definition).unwrap();
        let book = circuit.get_external("book", "Book", false).unwrap().output();
        let fair = circuit.get_external("fair", "double", true).unwrap().output();
        assert!(matches!(
            circuit.make_component("book_fair", "bf", wire([("book", book), ("fair", fair)])),
            Err(CircuitError::Component(ComponentError::ObservedMustTrigger { .. }))
        ));
    }

    #[test]
    fn generics_must_match_definition() {
        let mut circuit = Circuit::new();
        let mut definition = add_definition();
        definition.class_generics = BTreeMap::from([("N".into(), 0)]);
        circuit.add_definition("add_n", definition).unwrap();
        let a = circuit.get_external("a", "double", false).unwrap().output();
        let b = circuit.get_external("b", "double", false).unwrap().output();
        assert!(matches!(
            circuit.make_component("add_n", "bad", wire([("a", a.clone()), ("b", b.clone())])),
            Err(CircuitError::Component(ComponentError::MissingGeneric { .. }))
        ));
        circuit
            .make_component_with(
                "add_n",
                "good",
                wire([("a", a), ("b", b)]),
                ComponentConfig {
                    class_generics: BTreeMap::from([("N".into(), "4".into())]),
                    ..ComponentConfig::default()
                },
            )
            .unwrap();
    }
}

mod round_trip {
    use super::*;

    fn assert_round_trips(circuit: &Circuit) {
        let serialized = SerializedCircuit::from_circuit(circuit).unwrap();
        let json = serde_json::to_value(&serialized).unwrap();
        let parsed: SerializedCircuit = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, serialized);
        let rebuilt = parsed.into_circuit().unwrap();
        assert!(circuits_equal(circuit, &rebuilt));
    }

    #[test]
    fn empty() {
        assert_round_trips(&Circuit::new());
    }

    #[test]
    fn wide() {
        assert_round_trips(&wide_circuit());
    }

    #[test]
    fn options_params_and_arrays_survive() {
        let mut circuit = wide_circuit();
        circuit
            .component_mut("ab")
            .unwrap()
            .force_stored(None)
            .unwrap();
        let definition = Definition {
            class_name: "TreeSum".into(),
            header: "signals/tree_sum.hh".into(),
            inputs: BTreeMap::from([("vals".into(), InputSpec::Array {
                fields: BTreeSet::from(["x".into(), "y".into()]),
                meta: InputMetadata::default(),
            })]),
            output_specs: BTreeMap::from([("out".into(), OutputSpec::new("Output"))]),
            generic_callset: Some(CallSpec {
                written_set: BTreeSet::from(["vals".into()]),
                outputs: BTreeSet::from(["out".into()]),
                callback: Some("call".into()),
                ..CallSpec::default()
            }),
            ..Definition::default()
        };
        circuit.add_definition("tree_sum", definition).unwrap();
        let a = circuit.external("a").unwrap().output();
        let b = circuit.external("b").unwrap().output();
        let ab = circuit.component("ab").unwrap().output(None).unwrap();
        let batches = ComponentInput::Array(vec![
            BTreeMap::from([("x".into(), a), ("y".into(), b)]),
            BTreeMap::from([
                ("x".into(), ab),
                ("y".into(), circuit.external("c").unwrap().output()),
            ]),
        ]);
        circuit
            .make_component_with(
                "tree_sum",
                "sum",
                [("vals".into(), batches)],
                ComponentConfig {
                    params: Some(BTreeMap::from([
                        ("scale".into(), serde_json::json!(0.5)),
                        ("bias".into(), serde_json::json!([1, 2, 3])),
                    ])),
                    ..ComponentConfig::default()
                },
            )
            .unwrap();
        assert_round_trips(&circuit);
    }

    #[test]
    fn external_order_survives() {
        let mut circuit = Circuit::new();
        for name in ["zeta", "alpha", "mid"] {
            circuit.get_external(name, "double", false).unwrap();
        }
        let serialized = SerializedCircuit::from_circuit(&circuit).unwrap();
        let rebuilt = serialized.into_circuit().unwrap();
        let names: Vec<_> = rebuilt.externals().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert!(circuits_equal(&circuit, &rebuilt));
    }

    #[test]
    fn input_wire_format_is_discriminated() {
        let circuit = wide_circuit();
        let serialized = SerializedCircuit::from_circuit(&circuit).unwrap();
        let json = serde_json::to_value(&serialized).unwrap();
        assert_eq!(json["components"]["ab"]["inputs"]["a"]["input_type"], "single");
        assert_eq!(
            json["components"]["ab"]["inputs"]["a"]["input"]["external_name"],
            "a"
        );
        assert_eq!(
            json["components"]["abc"]["inputs"]["a"]["input"]["parent"],
            "ab"
        );
    }
}
