//! A self-describing, language-neutral encoding of a circuit.
//!
//! The wire format is a record tree with five name-keyed tables:
//! `externals`, `components`, `definitions`, `call_groups`, `call_structs`.
//! Component insertion order is not part of the format; deserialization
//! rebuilds components in name order, and [`circuits_equal`] compares
//! circuits the same way.

use super::circuit::{CallGroup, CallStruct, Circuit, CircuitError, ExternalInput};
use super::component::{Component, ComponentInput, ComponentOutput, InputBatch, OutputOptions};
use super::definition::Definition;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use thiserror::Error;
use triomphe::Arc;

/// A wired component input on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "input_type", rename_all = "lowercase")]
pub enum SerializedInput {
    Single { input: ComponentOutput },
    Array { inputs: Vec<InputBatch> },
}
impl From<&ComponentInput> for SerializedInput {
    fn from(input: &ComponentInput) -> Self {
        match input {
            ComponentInput::Single(output) => Self::Single {
                input: output.clone(),
            },
            ComponentInput::Array(batches) => Self::Array {
                inputs: batches.clone(),
            },
        }
    }
}
impl From<SerializedInput> for ComponentInput {
    fn from(input: SerializedInput) -> Self {
        match input {
            SerializedInput::Single { input } => Self::Single(input),
            SerializedInput::Array { inputs } => Self::Array(inputs),
        }
    }
}

/// A component on the wire: its definition is a name reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedComponent {
    pub name: SmolStr,
    pub definition: SmolStr,
    pub inputs: BTreeMap<SmolStr, SerializedInput>,
    #[serde(default)]
    pub output_options: BTreeMap<SmolStr, OutputOptions>,
    #[serde(default)]
    pub class_generics: BTreeMap<SmolStr, SmolStr>,
    #[serde(default)]
    pub params: Option<BTreeMap<SmolStr, serde_json::Value>>,
}

/// A whole circuit on the wire.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedCircuit {
    pub externals: BTreeMap<SmolStr, ExternalInput>,
    pub components: BTreeMap<SmolStr, SerializedComponent>,
    pub definitions: BTreeMap<SmolStr, Definition>,
    pub call_groups: BTreeMap<SmolStr, CallGroup>,
    pub call_structs: BTreeMap<SmolStr, CallStruct>,
}

/// A failure while rebuilding a circuit from its serialized form.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildCircuitError {
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    #[error("Component {component:?} references unknown definition {definition:?}")]
    UnknownDefinition {
        component: SmolStr,
        definition: SmolStr,
    },
    #[error("Component under key {key:?} names itself {name:?}")]
    NameMismatch { key: SmolStr, name: SmolStr },
    #[error("External under key {key:?} names itself {name:?}")]
    ExternalNameMismatch { key: SmolStr, name: SmolStr },
}

impl SerializedCircuit {
    /// Encode a circuit. The circuit is validated first.
    pub fn from_circuit(circuit: &Circuit) -> Result<Self, CircuitError> {
        circuit.validate()?;
        let mut components = BTreeMap::new();
        for component in circuit.components() {
            let definition = circuit
                .definitions()
                .iter()
                .find(|(_, def)| Arc::ptr_eq(def, &component.definition))
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| component.definition.class_name.clone());
            components.insert(
                component.name.clone(),
                SerializedComponent {
                    name: component.name.clone(),
                    definition,
                    inputs: component
                        .inputs
                        .iter()
                        .map(|(name, input)| (name.clone(), input.into()))
                        .collect(),
                    output_options: component.output_options.clone(),
                    class_generics: component.class_generics.clone(),
                    params: component.params.clone(),
                },
            );
        }
        Ok(Self {
            externals: circuit
                .externals()
                .iter()
                .map(|ext| (ext.name.clone(), ext.clone()))
                .collect(),
            components,
            definitions: circuit
                .definitions()
                .iter()
                .map(|(name, def)| (name.clone(), (**def).clone()))
                .collect(),
            call_groups: circuit.call_groups().clone(),
            call_structs: circuit.call_structs().clone(),
        })
    }

    /// Rebuild the circuit. Definitions are validated up front, the rebuilt
    /// circuit as a whole afterwards.
    pub fn into_circuit(self) -> Result<Circuit, BuildCircuitError> {
        let mut circuit = Circuit::new();
        for (name, definition) in self.definitions {
            circuit.add_definition(name, definition)?;
        }

        let mut externals: Vec<(SmolStr, ExternalInput)> = self.externals.into_iter().collect();
        externals.sort_by_key(|(_, ext)| ext.index);
        for (key, ext) in externals {
            if ext.name != key {
                return Err(BuildCircuitError::ExternalNameMismatch { key, name: ext.name });
            }
            circuit.get_external(ext.name, ext.ty, ext.must_trigger)?;
        }

        for (name, call_struct) in self.call_structs {
            circuit.add_call_struct(name, call_struct)?;
        }

        for (key, component) in self.components {
            if component.name != key {
                return Err(BuildCircuitError::NameMismatch {
                    key,
                    name: component.name,
                });
            }
            let Some(definition) = circuit.definition(&component.definition).cloned() else {
                return Err(BuildCircuitError::UnknownDefinition {
                    component: component.name,
                    definition: component.definition,
                });
            };
            circuit.insert_raw(Component {
                name: component.name,
                definition,
                inputs: component
                    .inputs
                    .into_iter()
                    .map(|(name, input)| (name, input.into()))
                    .collect(),
                output_options: component.output_options,
                class_generics: component.class_generics,
                params: component.params,
            });
        }

        for (name, group) in self.call_groups {
            circuit.add_call_group(name, group)?;
        }

        circuit.validate()?;
        Ok(circuit)
    }
}

/// Structural, name-keyed circuit equality: everything the wire format
/// carries, ignoring component insertion order.
pub fn circuits_equal(a: &Circuit, b: &Circuit) -> bool {
    let components = |c: &Circuit| -> BTreeMap<SmolStr, Component> {
        c.components()
            .iter()
            .map(|comp| (comp.name.clone(), comp.clone()))
            .collect()
    };
    a.externals() == b.externals()
        && components(a) == components(b)
        && a.definitions() == b.definitions()
        && a.call_groups() == b.call_groups()
        && a.call_structs() == b.call_structs()
}
