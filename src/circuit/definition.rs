//! Definitions: the immutable descriptions of component kinds.
//!
//! A [`Definition`] declares what a kind of component looks like: its input
//! schema, its outputs, and the callsets that map freshly written inputs to
//! the outputs they produce. Definitions are validated once, when they enter a
//! circuit, and shared by every component instantiated from them.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Flags shared by every input declaration.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InputMetadata {
    /// The input must be wired to a source that is itself always valid.
    #[serde(default)]
    pub always_valid: bool,
    /// The input may be left unwired.
    #[serde(default)]
    pub optional: bool,
    /// The input may go unused by every callset.
    #[serde(default)]
    pub allow_unused: bool,
}

/// The shape of a declared input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "input_type", rename_all = "lowercase")]
pub enum InputSpec {
    /// A plain input wired to exactly one source output.
    Single {
        #[serde(flatten)]
        meta: InputMetadata,
    },
    /// An aggregate input wired to an ordered list of batches, each batch
    /// supplying one source per field.
    Array {
        #[serde(default)]
        fields: BTreeSet<SmolStr>,
        #[serde(flatten)]
        meta: InputMetadata,
    },
}
impl InputSpec {
    /// A single input with default metadata.
    pub fn single() -> Self {
        Self::Single {
            meta: InputMetadata::default(),
        }
    }
    pub fn meta(&self) -> &InputMetadata {
        match self {
            Self::Single { meta } | Self::Array { meta, .. } => meta,
        }
    }
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }
    /// The batch fields of an array input, falling back to the input's own
    /// name when the declaration leaves them empty.
    pub fn fields_or(&self, name: &SmolStr) -> BTreeSet<SmolStr> {
        match self {
            Self::Single { .. } => BTreeSet::from([name.clone()]),
            Self::Array { fields, .. } => {
                if fields.is_empty() {
                    BTreeSet::from([name.clone()])
                } else {
                    fields.clone()
                }
            }
        }
    }
}

/// Extra environment handles a call can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMetadata {
    /// A handle to schedule timer events on the component.
    Timer,
    /// The current cycle time.
    Time,
}

/// A named update rule: which freshly written inputs cause which outputs to be
/// produced, and the callback that produces them.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallSpec {
    /// Inputs that must all carry fresh values for this spec to fire.
    pub written_set: BTreeSet<SmolStr>,
    /// Inputs passed to the call without forcing triggering.
    #[serde(default)]
    pub observes: BTreeSet<SmolStr>,
    /// Outputs this call may write.
    #[serde(default)]
    pub outputs: BTreeSet<SmolStr>,
    /// The function to invoke. A spec with no callback is skippable.
    #[serde(default)]
    pub callback: Option<SmolStr>,
    /// The function to invoke when cleaning up after the callset.
    #[serde(default)]
    pub cleanup: Option<SmolStr>,
    #[serde(default)]
    pub metadata: BTreeSet<CallMetadata>,
    /// Preexisting struct in the class to use for inputs.
    #[serde(default)]
    pub input_struct_path: Option<SmolStr>,
    /// Preexisting struct in the class to use for outputs.
    #[serde(default)]
    pub output_struct_path: Option<SmolStr>,
    /// Optional name, used for ordering and disambiguation.
    #[serde(default)]
    pub name: Option<SmolStr>,
}
impl CallSpec {
    /// Whether the callback can be skipped entirely.
    pub fn skippable(&self) -> bool {
        self.callback.is_none()
    }
    /// All inputs this call touches, written and observed.
    pub fn inputs(&self) -> impl Iterator<Item = &SmolStr> {
        self.written_set.iter().chain(&self.observes)
    }
    /// This spec with its cleanup promoted to the callback, if one exists.
    pub fn as_cleanup(&self) -> Option<CallSpec> {
        self.cleanup.clone().map(|cleanup| CallSpec {
            callback: Some(cleanup),
            ..self.clone()
        })
    }
}

/// Information about a single output of a definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Field of the parent class that describes the type.
    pub type_path: SmolStr,
    /// Whether the output's storage may be dropped between calls.
    #[serde(default)]
    pub ephemeral: bool,
    /// The output can be statically considered valid; the component gives up
    /// the ability to set validity.
    #[serde(default)]
    pub always_valid: bool,
    /// The output can be assumed invalid at the start of each call.
    #[serde(default)]
    pub assume_invalid: bool,
    /// The output contains the default value if it has not been written.
    #[serde(default)]
    pub assume_default: bool,
    #[serde(default)]
    pub default_constructor: Option<SmolStr>,
}
impl OutputSpec {
    /// A plain stored output of the given type.
    pub fn new(type_path: impl Into<SmolStr>) -> Self {
        Self {
            type_path: type_path.into(),
            ephemeral: false,
            always_valid: false,
            assume_invalid: false,
            assume_default: false,
            default_constructor: None,
        }
    }
    pub fn constructor(&self) -> &str {
        self.default_constructor.as_deref().unwrap_or("{}")
    }
}

/// How a component is initialized, if at all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InitSpec {
    pub init_call: SmolStr,
    #[serde(default)]
    pub metadata: BTreeSet<CallMetadata>,
    /// Whether the component's parameters are passed to initialization.
    #[serde(default)]
    pub takes_params: bool,
}
impl InitSpec {
    pub fn new(init_call: impl Into<SmolStr>) -> Self {
        Self {
            init_call: init_call.into(),
            metadata: BTreeSet::new(),
            takes_params: false,
        }
    }
}

/// An ordered list of callset names used to break ties when several callsets
/// match at once.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallsetGroup {
    pub callsets: Vec<SmolStr>,
}
impl CallsetGroup {
    pub fn new<S: Into<SmolStr>, I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            callsets: iter.into_iter().map(Into::into).collect(),
        }
    }
    /// The unordered set of names this group covers.
    pub fn names(&self) -> BTreeSet<&SmolStr> {
        self.callsets.iter().collect()
    }
}

/// Everything there is to know about a kind of component.
///
/// `class_name` and `header` are opaque strings forwarded to emitters.
/// `generics_order` maps inputs to the template positions their types fill;
/// `class_generics` does the same for explicitly supplied generics.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub class_name: SmolStr,
    pub header: SmolStr,
    #[serde(default)]
    pub inputs: BTreeMap<SmolStr, InputSpec>,
    #[serde(default)]
    pub output_specs: BTreeMap<SmolStr, OutputSpec>,
    #[serde(default)]
    pub callsets: BTreeSet<CallSpec>,
    /// Fired when no declared callset matches a trigger.
    #[serde(default)]
    pub generic_callset: Option<CallSpec>,
    /// Fired from the timer queue rather than from upstream writes.
    #[serde(default)]
    pub timer_callset: Option<CallSpec>,
    #[serde(default)]
    pub callset_groups: BTreeSet<CallsetGroup>,
    #[serde(default)]
    pub generics_order: BTreeMap<SmolStr, u32>,
    #[serde(default)]
    pub class_generics: BTreeMap<SmolStr, u32>,
    /// Called statically rather than on a stored component object.
    #[serde(default)]
    pub static_call: bool,
    #[serde(default)]
    pub init_spec: Option<InitSpec>,
    #[serde(default)]
    pub default_output: Option<SmolStr>,
    /// Name of the offline tensor operation replicating this component, if any.
    #[serde(default)]
    pub differentiable_operator_name: Option<SmolStr>,
    #[serde(default)]
    pub metadata: BTreeMap<SmolStr, serde_json::Value>,
}

/// A definition-level invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Generic input {input:?} of {class} is not an input")]
    GenericNotAnInput { class: SmolStr, input: SmolStr },
    #[error("A skippable callset of {class} has outputs {outputs:?}")]
    SkippableWithOutputs {
        class: SmolStr,
        outputs: Vec<SmolStr>,
    },
    #[error("Written input {input:?} of a callset in {class} is not an input")]
    WrittenNotAnInput { class: SmolStr, input: SmolStr },
    #[error("Input {input:?} of a callset in {class} is both written and observed")]
    WrittenAlsoObserved { class: SmolStr, input: SmolStr },
    #[error("Observed input {input:?} of a callset in {class} is not an input")]
    ObservedNotAnInput { class: SmolStr, input: SmolStr },
    #[error("A callset of {class} observes {input:?}, which is not a single input")]
    ObservedArrayInput { class: SmolStr, input: SmolStr },
    #[error("A callset of {class} is triggered on multiple aggregate inputs {inputs:?}")]
    MultipleAggregateInputs {
        class: SmolStr,
        inputs: Vec<SmolStr>,
    },
    #[error("A callset of {class} has aggregate input {input:?} but also a cleanup {cleanup:?}")]
    AggregateWithCleanup {
        class: SmolStr,
        input: SmolStr,
        cleanup: SmolStr,
    },
    #[error("Definition {class} repeats callset name {name:?}")]
    DuplicateCallsetName { class: SmolStr, name: SmolStr },
    #[error("Definition {class} has unused inputs {inputs:?}")]
    UnusedInputs {
        class: SmolStr,
        inputs: Vec<SmolStr>,
    },
    #[error("The generic callset of {class} has a nonempty observes - all inputs must be assumed written")]
    GenericObserves { class: SmolStr },
    #[error("Callset group of {class} references {name:?}, which is not a named callset")]
    GroupUnknownCallset { class: SmolStr, name: SmolStr },
    #[error("Definition {class} has two callset groups over the same names {names:?}")]
    DuplicateGroup { class: SmolStr, names: Vec<SmolStr> },
    #[error("Definition {class} has a skippable timer callset")]
    SkippableTimer { class: SmolStr },
    #[error("The timer callset of {class} has a nonempty written set - all inputs must be observed")]
    TimerWrites { class: SmolStr },
    #[error("Output {output:?} of {class} is both always valid and assumed invalid")]
    AlwaysValidAssumeInvalid { class: SmolStr, output: SmolStr },
    #[error("Output {output:?} of {class} is assumed default but neither always valid nor assumed invalid")]
    AssumeDefaultNeverWritten { class: SmolStr, output: SmolStr },
    #[error("Output {output:?} of {class} is assumed default but not ephemeral")]
    AssumeDefaultStored { class: SmolStr, output: SmolStr },
    #[error("Output {output:?} of {class} has a default constructor but is not assumed default")]
    ConstructorWithoutDefault { class: SmolStr, output: SmolStr },
    #[error("Default output {output:?} of {class} is not an output")]
    DefaultOutputMissing { class: SmolStr, output: SmolStr },
}

impl Definition {
    /// The names of all declared outputs.
    pub fn outputs(&self) -> impl Iterator<Item = &SmolStr> {
        self.output_specs.keys()
    }
    /// Every callset, including the generic and timer ones.
    pub fn all_callsets(&self) -> impl Iterator<Item = &CallSpec> {
        self.callsets
            .iter()
            .chain(&self.generic_callset)
            .chain(&self.timer_callset)
    }
    /// Names of the named callsets.
    pub fn callset_names(&self) -> BTreeSet<&SmolStr> {
        self.callsets.iter().filter_map(|c| c.name.as_ref()).collect()
    }
    /// Inputs whose writes can cause this component to fire.
    pub fn triggering_inputs(&self) -> BTreeSet<&SmolStr> {
        self.all_callsets().flat_map(|c| &c.written_set).collect()
    }
    pub fn differentiable(&self) -> bool {
        self.differentiable_operator_name.is_some()
    }

    /// Check every definition-level invariant.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        self.validate_generics()?;
        self.validate_callsets()?;
        self.validate_callset_groups()?;
        self.validate_outputs()?;
        self.validate_timer()
    }

    fn validate_generics(&self) -> Result<(), DefinitionError> {
        for input in self.generics_order.keys() {
            if !self.inputs.contains_key(input) {
                return Err(DefinitionError::GenericNotAnInput {
                    class: self.class_name.clone(),
                    input: input.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_callset(&self, callset: &CallSpec) -> Result<(), DefinitionError> {
        let class = || self.class_name.clone();
        if callset.skippable() && !callset.outputs.is_empty() {
            return Err(DefinitionError::SkippableWithOutputs {
                class: class(),
                outputs: callset.outputs.iter().cloned().collect(),
            });
        }
        for written in &callset.written_set {
            if !self.inputs.contains_key(written) {
                return Err(DefinitionError::WrittenNotAnInput {
                    class: class(),
                    input: written.clone(),
                });
            }
            if callset.observes.contains(written) {
                return Err(DefinitionError::WrittenAlsoObserved {
                    class: class(),
                    input: written.clone(),
                });
            }
        }
        for observed in &callset.observes {
            let Some(spec) = self.inputs.get(observed) else {
                return Err(DefinitionError::ObservedNotAnInput {
                    class: class(),
                    input: observed.clone(),
                });
            };
            if spec.is_array() {
                return Err(DefinitionError::ObservedArrayInput {
                    class: class(),
                    input: observed.clone(),
                });
            }
        }
        let aggregates: Vec<SmolStr> = callset
            .inputs()
            .filter(|i| self.inputs.get(*i).is_some_and(InputSpec::is_array))
            .cloned()
            .collect();
        match &aggregates[..] {
            [] => {}
            [input] => {
                if let Some(cleanup) = &callset.cleanup {
                    return Err(DefinitionError::AggregateWithCleanup {
                        class: class(),
                        input: input.clone(),
                        cleanup: cleanup.clone(),
                    });
                }
            }
            _ => {
                return Err(DefinitionError::MultipleAggregateInputs {
                    class: class(),
                    inputs: aggregates,
                });
            }
        }
        Ok(())
    }

    fn validate_callsets(&self) -> Result<(), DefinitionError> {
        for callset in self.all_callsets() {
            self.validate_callset(callset)?;
        }

        let mut seen_names = BTreeSet::new();
        for callset in &self.callsets {
            if let Some(name) = &callset.name
                && !seen_names.insert(name)
            {
                return Err(DefinitionError::DuplicateCallsetName {
                    class: self.class_name.clone(),
                    name: name.clone(),
                });
            }
        }

        let used: BTreeSet<&SmolStr> = self.all_callsets().flat_map(CallSpec::inputs).collect();
        let unused: Vec<SmolStr> = self
            .inputs
            .iter()
            .filter(|(name, spec)| !used.contains(name) && !spec.meta().allow_unused)
            .map(|(name, _)| name.clone())
            .collect();
        if !unused.is_empty() {
            return Err(DefinitionError::UnusedInputs {
                class: self.class_name.clone(),
                inputs: unused,
            });
        }

        if let Some(generic) = &self.generic_callset
            && !generic.observes.is_empty()
        {
            return Err(DefinitionError::GenericObserves {
                class: self.class_name.clone(),
            });
        }
        Ok(())
    }

    fn validate_callset_groups(&self) -> Result<(), DefinitionError> {
        let known = self.callset_names();
        let mut seen_name_sets = BTreeSet::new();
        for group in &self.callset_groups {
            let names = group.names();
            for name in &names {
                if !known.contains(*name) {
                    return Err(DefinitionError::GroupUnknownCallset {
                        class: self.class_name.clone(),
                        name: (*name).clone(),
                    });
                }
            }
            if !seen_name_sets.insert(names.clone()) {
                return Err(DefinitionError::DuplicateGroup {
                    class: self.class_name.clone(),
                    names: names.into_iter().cloned().collect(),
                });
            }
        }
        Ok(())
    }

    fn validate_timer(&self) -> Result<(), DefinitionError> {
        if let Some(timer) = &self.timer_callset {
            if timer.skippable() {
                return Err(DefinitionError::SkippableTimer {
                    class: self.class_name.clone(),
                });
            }
            if !timer.written_set.is_empty() {
                return Err(DefinitionError::TimerWrites {
                    class: self.class_name.clone(),
                });
            }
            self.validate_callset(timer)?;
        }
        Ok(())
    }

    fn validate_outputs(&self) -> Result<(), DefinitionError> {
        for (output, spec) in &self.output_specs {
            let fail = |err: fn(SmolStr, SmolStr) -> DefinitionError| {
                Err(err(self.class_name.clone(), output.clone()))
            };
            if spec.always_valid && spec.assume_invalid {
                return fail(|class, output| DefinitionError::AlwaysValidAssumeInvalid {
                    class,
                    output,
                });
            }
            if spec.assume_default && !(spec.always_valid || spec.assume_invalid) {
                return fail(|class, output| DefinitionError::AssumeDefaultNeverWritten {
                    class,
                    output,
                });
            }
            if spec.assume_default && !spec.ephemeral {
                return fail(|class, output| DefinitionError::AssumeDefaultStored { class, output });
            }
            if spec.default_constructor.is_some() && !spec.assume_default {
                return fail(|class, output| DefinitionError::ConstructorWithoutDefault {
                    class,
                    output,
                });
            }
        }
        if let Some(default) = &self.default_output
            && !self.output_specs.contains_key(default)
        {
            return Err(DefinitionError::DefaultOutputMissing {
                class: self.class_name.clone(),
                output: default.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Definition {
        Definition {
            class_name: "TestComponent".into(),
            header: "test.hh".into(),
            inputs: BTreeMap::from([
                ("a".into(), InputSpec::single()),
                ("b".into(), InputSpec::single()),
            ]),
            output_specs: BTreeMap::from([("out".into(), {
                let mut spec = OutputSpec::new("Output");
                spec.ephemeral = true;
                spec
            })]),
            generic_callset: Some(CallSpec {
                written_set: BTreeSet::from(["a".into(), "b".into()]),
                outputs: BTreeSet::from(["out".into()]),
                callback: Some("call".into()),
                ..CallSpec::default()
            }),
            ..Definition::default()
        }
    }

    #[test]
    fn base_is_valid() {
        base().validate().unwrap();
    }

    #[test]
    fn skippable_with_outputs() {
        let mut def = base();
        def.callsets.insert(CallSpec {
            written_set: BTreeSet::from(["a".into()]),
            outputs: BTreeSet::from(["out".into()]),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::SkippableWithOutputs { .. })
        ));
    }

    #[test]
    fn written_must_exist() {
        let mut def = base();
        def.generic_callset.as_mut().unwrap().written_set.insert("zz".into());
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::WrittenNotAnInput { .. })
        ));
    }

    #[test]
    fn written_and_observed_disjoint() {
        let mut def = base();
        def.callsets.insert(CallSpec {
            written_set: BTreeSet::from(["a".into()]),
            observes: BTreeSet::from(["a".into()]),
            callback: Some("call".into()),
            name: Some("dup".into()),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::WrittenAlsoObserved { .. })
        ));
    }

    #[test]
    fn observed_array_rejected() {
        let mut def = base();
        def.inputs.insert(
            "batch".into(),
            InputSpec::Array {
                fields: BTreeSet::new(),
                meta: InputMetadata::default(),
            },
        );
        def.callsets.insert(CallSpec {
            written_set: BTreeSet::from(["a".into()]),
            observes: BTreeSet::from(["batch".into()]),
            callback: Some("call".into()),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::ObservedArrayInput { .. })
        ));
    }

    #[test]
    fn multiple_aggregates_rejected() {
        let mut def = base();
        for name in ["m1", "m2"] {
            def.inputs.insert(
                name.into(),
                InputSpec::Array {
                    fields: BTreeSet::new(),
                    meta: InputMetadata::default(),
                },
            );
        }
        def.callsets.insert(CallSpec {
            written_set: BTreeSet::from(["m1".into(), "m2".into()]),
            callback: Some("call".into()),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::MultipleAggregateInputs { .. })
        ));
    }

    #[test]
    fn aggregate_with_cleanup_rejected() {
        let mut def = base();
        def.inputs.insert(
            "m1".into(),
            InputSpec::Array {
                fields: BTreeSet::new(),
                meta: InputMetadata::default(),
            },
        );
        def.callsets.insert(CallSpec {
            written_set: BTreeSet::from(["m1".into()]),
            callback: Some("call".into()),
            cleanup: Some("cleanup".into()),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::AggregateWithCleanup { .. })
        ));
    }

    #[test]
    fn duplicate_callset_names_rejected() {
        let mut def = base();
        for written in ["a", "b"] {
            def.callsets.insert(CallSpec {
                written_set: BTreeSet::from([written.into()]),
                callback: Some("call".into()),
                name: Some("same".into()),
                ..CallSpec::default()
            });
        }
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::DuplicateCallsetName { .. })
        ));
    }

    #[test]
    fn unused_inputs_rejected_unless_allowed() {
        let mut def = base();
        def.inputs.insert("spare".into(), InputSpec::single());
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::UnusedInputs { .. })
        ));
        def.inputs.insert(
            "spare".into(),
            InputSpec::Single {
                meta: InputMetadata {
                    allow_unused: true,
                    ..InputMetadata::default()
                },
            },
        );
        def.validate().unwrap();
    }

    #[test]
    fn generic_observes_rejected() {
        let mut def = base();
        def.generic_callset.as_mut().unwrap().observes = BTreeSet::from(["a".into()]);
        // remove `a` from the written set so the callset stays well-formed
        def.generic_callset.as_mut().unwrap().written_set.remove("a");
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::GenericObserves { .. })
        ));
    }

    #[test]
    fn group_names_must_be_callsets() {
        let mut def = base();
        def.callset_groups.insert(CallsetGroup::new(["nope"]));
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::GroupUnknownCallset { .. })
        ));
    }

    #[test]
    fn duplicate_groups_rejected() {
        let mut def = base();
        for written in ["a", "b"] {
            def.callsets.insert(CallSpec {
                written_set: BTreeSet::from([written.into()]),
                callback: Some("call".into()),
                name: Some(written.into()),
                ..CallSpec::default()
            });
        }
        def.callset_groups.insert(CallsetGroup::new(["a", "b"]));
        def.callset_groups.insert(CallsetGroup::new(["b", "a"]));
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::DuplicateGroup { .. })
        ));
    }

    #[test]
    fn timer_rules() {
        let mut def = base();
        def.timer_callset = Some(CallSpec {
            observes: BTreeSet::from(["a".into()]),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::SkippableTimer { .. })
        ));
        def.timer_callset = Some(CallSpec {
            written_set: BTreeSet::from(["a".into()]),
            callback: Some("tick".into()),
            ..CallSpec::default()
        });
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::TimerWrites { .. })
        ));
        def.timer_callset = Some(CallSpec {
            observes: BTreeSet::from(["a".into()]),
            outputs: BTreeSet::from(["out".into()]),
            callback: Some("tick".into()),
            ..CallSpec::default()
        });
        def.validate().unwrap();
    }

    #[test]
    fn output_spec_consistency() {
        let mut def = base();
        let spec = |f: fn(&mut OutputSpec)| {
            let mut spec = OutputSpec::new("Output");
            f(&mut spec);
            spec
        };
        def.output_specs.insert(
            "bad".into(),
            spec(|s| {
                s.always_valid = true;
                s.assume_invalid = true;
            }),
        );
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::AlwaysValidAssumeInvalid { .. })
        ));
        def.output_specs.insert(
            "bad".into(),
            spec(|s| {
                s.ephemeral = true;
                s.assume_default = true;
            }),
        );
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::AssumeDefaultNeverWritten { .. })
        ));
        def.output_specs.insert(
            "bad".into(),
            spec(|s| {
                s.always_valid = true;
                s.assume_default = true;
            }),
        );
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::AssumeDefaultStored { .. })
        ));
        def.output_specs.insert(
            "bad".into(),
            spec(|s| s.default_constructor = Some("Output(0)".into())),
        );
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::ConstructorWithoutDefault { .. })
        ));
        def.output_specs.remove("bad");
        def.default_output = Some("bad".into());
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::DefaultOutputMissing { .. })
        ));
    }

    #[test]
    fn validation_is_idempotent() {
        let def = base();
        def.validate().unwrap();
        def.validate().unwrap();
        assert_eq!(def, base());
    }
}
