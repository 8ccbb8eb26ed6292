//! Component instances and the wiring between them.

use super::circuit::Circuit;
use super::definition::{Definition, InputSpec};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use thiserror::Error;
use triomphe::Arc;

/// A value reference: either an external input or an output of another
/// component. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentOutput {
    External { external_name: SmolStr },
    Graph { parent: SmolStr, output_name: SmolStr },
}
impl ComponentOutput {
    pub fn external(name: impl Into<SmolStr>) -> Self {
        Self::External {
            external_name: name.into(),
        }
    }
    pub fn graph(parent: impl Into<SmolStr>, output_name: impl Into<SmolStr>) -> Self {
        Self::Graph {
            parent: parent.into(),
            output_name: output_name.into(),
        }
    }
    /// The producing component's name, or `"external"` for external inputs.
    pub fn parent(&self) -> &str {
        match self {
            Self::External { .. } => "external",
            Self::Graph { parent, .. } => parent,
        }
    }
    pub fn output_name(&self) -> &str {
        match self {
            Self::External { external_name } => external_name,
            Self::Graph { output_name, .. } => output_name,
        }
    }
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}
impl Display for ComponentOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.parent(), self.output_name())
    }
}

/// One batch of an array input: a source output per declared field.
pub type InputBatch = BTreeMap<SmolStr, ComponentOutput>;

/// How a component input is wired.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentInput {
    /// Wired to exactly one source.
    Single(ComponentOutput),
    /// Wired to an ordered list of batches.
    Array(Vec<InputBatch>),
}
impl ComponentInput {
    /// Every source output feeding this input.
    pub fn outputs(&self) -> SmallVec<[&ComponentOutput; 1]> {
        match self {
            Self::Single(output) => SmallVec::from_slice(&[output]),
            Self::Array(batches) => batches.iter().flat_map(BTreeMap::values).collect(),
        }
    }
    /// The names of every component this input reads from.
    pub fn parents(&self) -> BTreeSet<&str> {
        self.outputs().iter().map(|o| o.parent()).collect()
    }
}
impl From<ComponentOutput> for ComponentInput {
    fn from(output: ComponentOutput) -> Self {
        Self::Single(output)
    }
}

/// Per-component overrides for one output. Merging keeps the strongest
/// request per field.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OutputOptions {
    /// Keep the output in persistent storage even if its spec is ephemeral.
    #[serde(default)]
    pub force_stored: bool,
    /// Do not let writes to this output trigger downstream components.
    #[serde(default)]
    pub block_propagation: bool,
}
impl OutputOptions {
    pub fn strongest_of(self, other: Self) -> Self {
        Self {
            force_stored: self.force_stored || other.force_stored,
            block_propagation: self.block_propagation || other.block_propagation,
        }
    }
}

/// Pointer identity of an interned definition.
#[derive(Debug, Clone)]
pub struct DefinitionId(Arc<Definition>);
impl DefinitionId {
    pub fn get(&self) -> &Definition {
        &self.0
    }
}
impl PartialEq for DefinitionId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for DefinitionId {}
impl Hash for DefinitionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(&*self.0 as *const Definition, state);
    }
}

/// Structural identity of a component, used to coalesce duplicate inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentIndex {
    pub inputs: BTreeMap<SmolStr, ComponentInput>,
    pub definition: DefinitionId,
    pub class_generics: BTreeMap<SmolStr, SmolStr>,
    pub params: Option<BTreeMap<SmolStr, serde_json::Value>>,
}
impl Eq for ComponentIndex {}
impl Hash for ComponentIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inputs.hash(state);
        self.definition.hash(state);
        self.class_generics.hash(state);
        // params values are free-form JSON; full identity is settled by `Eq`
        if let Some(params) = &self.params {
            for key in params.keys() {
                key.hash(state);
            }
        }
    }
}

/// A component-level invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("Component {component} has generic {generic:?} which is not in the definition")]
    UnknownGeneric { component: SmolStr, generic: SmolStr },
    #[error("Component {component} is missing generic {generic:?}")]
    MissingGeneric { component: SmolStr, generic: SmolStr },
    #[error("Component {component} has output options for {output:?} which is not an output")]
    OptionsForUnknownOutput { component: SmolStr, output: SmolStr },
    #[error("Component {component} requested output {output:?} be stored, despite it being assumed invalid")]
    ForceStoredAssumeInvalid { component: SmolStr, output: SmolStr },
    #[error("Component {component} has input {input:?} which is not in the definition")]
    UnknownInput { component: SmolStr, input: SmolStr },
    #[error("Component {component} is missing input {input:?}")]
    MissingInput { component: SmolStr, input: SmolStr },
    #[error("Input {input:?} of component {component} saw output {output} twice")]
    DuplicateSource {
        component: SmolStr,
        input: SmolStr,
        output: ComponentOutput,
    },
    #[error("Input {input:?} of component {component} is wired as {wired} but declared {declared}")]
    InputShapeMismatch {
        component: SmolStr,
        input: SmolStr,
        wired: &'static str,
        declared: &'static str,
    },
    #[error("Batch {index} of input {input:?} for component {component} had fields {got:?} but expected {expected:?}")]
    BatchFieldMismatch {
        component: SmolStr,
        input: SmolStr,
        index: usize,
        got: Vec<SmolStr>,
        expected: Vec<SmolStr>,
    },
    #[error("Input {input:?} of component {component} references unknown source {output}")]
    UnknownSource {
        component: SmolStr,
        input: SmolStr,
        output: ComponentOutput,
    },
    #[error("Input {input:?} of component {component} must always be valid but references {output}, which is not")]
    SourceNotAlwaysValid {
        component: SmolStr,
        input: SmolStr,
        output: ComponentOutput,
    },
    #[error("Component {component} observes {input:?}, which links to output {output} that requires triggering")]
    ObservedMustTrigger {
        component: SmolStr,
        input: SmolStr,
        output: ComponentOutput,
    },
    #[error("Component {component} does not have output {output:?}")]
    NoSuchOutput { component: SmolStr, output: SmolStr },
    #[error("Cannot take the default output of component {component} with {count} outputs")]
    NoDefaultOutput { component: SmolStr, count: usize },
}

/// An instantiation of a [`Definition`] inside a circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: SmolStr,
    pub definition: Arc<Definition>,
    pub inputs: BTreeMap<SmolStr, ComponentInput>,
    pub output_options: BTreeMap<SmolStr, OutputOptions>,
    pub class_generics: BTreeMap<SmolStr, SmolStr>,
    pub params: Option<BTreeMap<SmolStr, serde_json::Value>>,
}
impl Component {
    /// A handle to one of this component's outputs.
    ///
    /// With no name this resolves the definition's default output, or the
    /// sole output if there is exactly one.
    pub fn output(&self, which: Option<&str>) -> Result<ComponentOutput, ComponentError> {
        let name = match (which, &self.definition.default_output) {
            (Some(which), _) => which,
            (None, Some(default)) => default.as_str(),
            (None, None) => {
                let mut outputs = self.definition.output_specs.keys();
                match (outputs.next(), outputs.next()) {
                    (Some(only), None) => only.as_str(),
                    _ => {
                        return Err(ComponentError::NoDefaultOutput {
                            component: self.name.clone(),
                            count: self.definition.output_specs.len(),
                        });
                    }
                }
            }
        };
        if !self.definition.output_specs.contains_key(name) {
            return Err(ComponentError::NoSuchOutput {
                component: self.name.clone(),
                output: name.into(),
            });
        }
        Ok(ComponentOutput::graph(self.name.clone(), name))
    }

    /// The options requested for an output, defaulting to none.
    pub fn options(&self, which: Option<&str>) -> Result<OutputOptions, ComponentError> {
        let output = self.output(which)?;
        Ok(self
            .output_options
            .get(output.output_name())
            .copied()
            .unwrap_or_default())
    }

    /// Request that an output be kept in persistent storage.
    pub fn force_stored(&mut self, which: Option<&str>) -> Result<(), ComponentError> {
        self.upgrade_options(which, OutputOptions {
            force_stored: true,
            block_propagation: false,
        })
    }

    /// Request that writes to an output not trigger downstream components.
    pub fn block_propagation(&mut self, which: Option<&str>) -> Result<(), ComponentError> {
        self.upgrade_options(which, OutputOptions {
            force_stored: false,
            block_propagation: true,
        })
    }

    fn upgrade_options(
        &mut self,
        which: Option<&str>,
        options: OutputOptions,
    ) -> Result<(), ComponentError> {
        let output = self.output(which)?;
        let entry = self
            .output_options
            .entry(output.output_name().into())
            .or_default();
        *entry = entry.strongest_of(options);
        Ok(())
    }

    /// The wired inputs whose writes can cause this component to fire.
    pub fn triggering_inputs(&self) -> impl Iterator<Item = &ComponentInput> {
        self.definition
            .triggering_inputs()
            .into_iter()
            .filter_map(|name| self.inputs.get(name))
    }

    /// The structural identity used for deduplication.
    pub fn index(&self) -> ComponentIndex {
        ComponentIndex {
            inputs: self.inputs.clone(),
            definition: DefinitionId(self.definition.clone()),
            class_generics: self.class_generics.clone(),
            params: self.params.clone(),
        }
    }

    /// Check every component-level invariant against the circuit.
    pub(crate) fn validate(&self, circuit: &Circuit) -> Result<(), ComponentError> {
        for generic in self.class_generics.keys() {
            if !self.definition.class_generics.contains_key(generic) {
                return Err(ComponentError::UnknownGeneric {
                    component: self.name.clone(),
                    generic: generic.clone(),
                });
            }
        }
        for generic in self.definition.class_generics.keys() {
            if !self.class_generics.contains_key(generic) {
                return Err(ComponentError::MissingGeneric {
                    component: self.name.clone(),
                    generic: generic.clone(),
                });
            }
        }

        for (output, options) in &self.output_options {
            let Some(spec) = self.definition.output_specs.get(output) else {
                return Err(ComponentError::OptionsForUnknownOutput {
                    component: self.name.clone(),
                    output: output.clone(),
                });
            };
            if options.force_stored && spec.assume_invalid {
                return Err(ComponentError::ForceStoredAssumeInvalid {
                    component: self.name.clone(),
                    output: output.clone(),
                });
            }
        }

        for (input_name, wired) in &self.inputs {
            let Some(declared) = self.definition.inputs.get(input_name) else {
                return Err(ComponentError::UnknownInput {
                    component: self.name.clone(),
                    input: input_name.clone(),
                });
            };
            self.validate_input(input_name, wired, declared, circuit)?;
        }

        let must_trigger = circuit.must_trigger_outputs();
        for callset in self.definition.all_callsets() {
            for observed in &callset.observes {
                let Some(wired) = self.inputs.get(observed) else {
                    continue;
                };
                for output in wired.outputs() {
                    if must_trigger.contains(output) {
                        return Err(ComponentError::ObservedMustTrigger {
                            component: self.name.clone(),
                            input: observed.clone(),
                            output: output.clone(),
                        });
                    }
                }
            }
        }

        for (input_name, declared) in &self.definition.inputs {
            if !self.inputs.contains_key(input_name) && !declared.meta().optional {
                return Err(ComponentError::MissingInput {
                    component: self.name.clone(),
                    input: input_name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_input(
        &self,
        input_name: &SmolStr,
        wired: &ComponentInput,
        declared: &InputSpec,
        circuit: &Circuit,
    ) -> Result<(), ComponentError> {
        let mut seen = BTreeSet::new();
        for output in wired.outputs() {
            if !seen.insert(output) {
                return Err(ComponentError::DuplicateSource {
                    component: self.name.clone(),
                    input: input_name.clone(),
                    output: output.clone(),
                });
            }
        }

        match (wired, declared) {
            (ComponentInput::Single(_), InputSpec::Single { .. }) => {}
            (ComponentInput::Array(batches), InputSpec::Array { .. }) => {
                let expected = declared.fields_or(input_name);
                for (index, batch) in batches.iter().enumerate() {
                    let got: BTreeSet<SmolStr> = batch.keys().cloned().collect();
                    if got != expected {
                        return Err(ComponentError::BatchFieldMismatch {
                            component: self.name.clone(),
                            input: input_name.clone(),
                            index,
                            got: got.into_iter().collect(),
                            expected: expected.into_iter().collect(),
                        });
                    }
                }
            }
            (wired, declared) => {
                return Err(ComponentError::InputShapeMismatch {
                    component: self.name.clone(),
                    input: input_name.clone(),
                    wired: match wired {
                        ComponentInput::Single(_) => "single",
                        ComponentInput::Array(_) => "array",
                    },
                    declared: match declared {
                        InputSpec::Single { .. } => "single",
                        InputSpec::Array { .. } => "array",
                    },
                });
            }
        }

        let always_valid = declared.meta().always_valid;
        for output in wired.outputs() {
            let unknown = || ComponentError::UnknownSource {
                component: self.name.clone(),
                input: input_name.clone(),
                output: output.clone(),
            };
            match output {
                ComponentOutput::External { external_name } => {
                    if circuit.external(external_name).is_none() {
                        return Err(unknown());
                    }
                    if always_valid {
                        return Err(ComponentError::SourceNotAlwaysValid {
                            component: self.name.clone(),
                            input: input_name.clone(),
                            output: output.clone(),
                        });
                    }
                }
                ComponentOutput::Graph {
                    parent,
                    output_name,
                } => {
                    let Some(spec) = circuit
                        .component(parent)
                        .and_then(|parent| parent.definition.output_specs.get(output_name))
                    else {
                        return Err(unknown());
                    };
                    if always_valid && !spec.always_valid {
                        return Err(ComponentError::SourceNotAlwaysValid {
                            component: self.name.clone(),
                            input: input_name.clone(),
                            output: output.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
