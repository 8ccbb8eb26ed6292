//! Storage and validity annotation for every called component.
//!
//! Annotations are pure data: an emitter consumes them verbatim to decide
//! where each value lives and how its validity is tracked at runtime.

use super::LowerError;
use super::callset::MatchMode;
use super::ephemeral::{all_nonephemeral_outputs_with, is_ephemeral};
use super::subgraph::Subgraph;
use crate::circuit::circuit::Circuit;
use crate::circuit::component::ComponentOutput;
use crate::circuit::definition::CallSpec;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};

/// Where an output's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphVar {
    /// Per-invocation scratch, rebuilt from the constructor each call.
    PerCall {
        type_path: SmolStr,
        constructor: SmolStr,
    },
    /// A slot in the circuit's persistent storage.
    Stored,
}

/// How an output's validity is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphValid {
    /// A per-invocation flag, reset at the start of each call.
    PerCall { valid_by_default: bool },
    /// A flag in the circuit's persistent storage.
    Stored,
    /// Statically valid; no runtime bit exists.
    Always,
}

/// The storage and validity discipline of one value reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphVariable {
    pub output: ComponentOutput,
    pub var: GraphVar,
    pub valid: GraphValid,
}

/// A called component with every input and produced output bound to its
/// concrete variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedComponent {
    pub component: SmolStr,
    pub callsets: Vec<CallSpec>,
    /// Keyed by the source output each input reference resolves to.
    pub input_variables: BTreeMap<ComponentOutput, GraphVariable>,
    /// Keyed by output name.
    pub output_variables: BTreeMap<SmolStr, GraphVariable>,
}

/// The variable for one output reference.
pub fn output_variable(
    circuit: &Circuit,
    nonephemeral: &BTreeSet<ComponentOutput>,
    output: &ComponentOutput,
) -> Result<GraphVariable, LowerError> {
    match output {
        ComponentOutput::External { .. } => Ok(GraphVariable {
            output: output.clone(),
            var: GraphVar::Stored,
            valid: GraphValid::Stored,
        }),
        ComponentOutput::Graph {
            parent,
            output_name,
        } => {
            let component =
                circuit
                    .component(parent)
                    .ok_or_else(|| LowerError::UnknownComponent {
                        name: parent.clone(),
                    })?;
            let spec = component
                .definition
                .output_specs
                .get(output_name)
                .ok_or_else(|| LowerError::UnknownOutput {
                    component: parent.clone(),
                    output: output_name.clone(),
                })?;
            let ephemeral = is_ephemeral(component, output_name, nonephemeral);
            let var = if ephemeral {
                GraphVar::PerCall {
                    type_path: spec.type_path.clone(),
                    constructor: spec
                        .default_constructor
                        .clone()
                        .unwrap_or_else(|| SmolStr::new_static("Default::default()")),
                }
            } else {
                GraphVar::Stored
            };
            let valid = if spec.always_valid {
                GraphValid::Always
            } else if spec.assume_invalid || ephemeral {
                GraphValid::PerCall {
                    valid_by_default: false,
                }
            } else {
                GraphValid::Stored
            };
            Ok(GraphVariable {
                output: output.clone(),
                var,
                valid,
            })
        }
    }
}

/// Annotate every call of a subgraph against a precomputed non-ephemeral set.
pub fn annotate_with(
    circuit: &Circuit,
    subgraph: &Subgraph,
    nonephemeral: &BTreeSet<ComponentOutput>,
) -> Result<Vec<AnnotatedComponent>, LowerError> {
    let mut annotated = Vec::with_capacity(subgraph.calls.len());
    for call in &subgraph.calls {
        let component =
            circuit
                .component(&call.component)
                .ok_or_else(|| LowerError::UnknownComponent {
                    name: call.component.clone(),
                })?;

        let mut input_variables = BTreeMap::new();
        for callset in &call.callsets {
            for input in callset.inputs() {
                let Some(wired) = component.inputs.get(input) else {
                    continue;
                };
                for output in wired.outputs() {
                    if !input_variables.contains_key(output) {
                        let variable = output_variable(circuit, nonephemeral, output)?;
                        input_variables.insert(output.clone(), variable);
                    }
                }
            }
        }

        let mut output_variables = BTreeMap::new();
        for callset in &call.callsets {
            for output_name in &callset.outputs {
                if output_variables.contains_key(output_name) {
                    continue;
                }
                let output = ComponentOutput::graph(call.component.clone(), output_name.clone());
                let variable = output_variable(circuit, nonephemeral, &output)?;
                output_variables.insert(output_name.clone(), variable);
            }
        }

        annotated.push(AnnotatedComponent {
            component: call.component.clone(),
            callsets: call.callsets.clone(),
            input_variables,
            output_variables,
        });
    }
    Ok(annotated)
}

/// Annotate every call of a subgraph.
pub fn annotate(circuit: &Circuit, subgraph: &Subgraph) -> Result<Vec<AnnotatedComponent>, LowerError> {
    annotate_mode(circuit, subgraph, MatchMode::default())
}

/// [`annotate`] with an explicit freshness-matching mode.
pub fn annotate_mode(
    circuit: &Circuit,
    subgraph: &Subgraph,
    mode: MatchMode,
) -> Result<Vec<AnnotatedComponent>, LowerError> {
    let nonephemeral = all_nonephemeral_outputs_with(circuit, mode)?;
    annotate_with(circuit, subgraph, &nonephemeral)
}
