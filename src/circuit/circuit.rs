//! The circuit: a mutable builder over definitions, components, externals,
//! and entry points.
//!
//! Components can only reference previously inserted components as sources,
//! which is what keeps the graph acyclic by construction. Insertions with the
//! same structural [`index`](Component::index) coalesce into the first unless
//! forced.

use super::component::{
    Component, ComponentError, ComponentIndex, ComponentInput, ComponentOutput, OutputOptions,
};
use super::definition::{Definition, DefinitionError};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use triomphe::Arc;

/// A named value entering the circuit from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInput {
    #[serde(rename = "type")]
    pub ty: SmolStr,
    pub name: SmolStr,
    /// Position assigned by insertion order.
    pub index: u32,
    /// Consumers may only trigger on this input, never merely observe it.
    #[serde(default)]
    pub must_trigger: bool,
}
impl ExternalInput {
    pub fn output(&self) -> ComponentOutput {
        ComponentOutput::external(self.name.clone())
    }
}

/// An externally defined struct backing a [`CallStruct`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalStruct {
    pub struct_name: SmolStr,
    #[serde(default)]
    pub header: Option<SmolStr>,
}

/// A typed record shape for a call group's payload.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStruct {
    /// Field name to field type.
    pub inputs: BTreeMap<SmolStr, SmolStr>,
    #[serde(default)]
    pub external_struct: Option<ExternalStruct>,
}
impl CallStruct {
    pub fn from_fields<K: Into<SmolStr>, V: Into<SmolStr>, I: IntoIterator<Item = (K, V)>>(
        fields: I,
    ) -> Self {
        Self {
            inputs: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            external_struct: None,
        }
    }
}

/// A typed entry point: a binding of call-struct fields to external inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGroup {
    #[serde(rename = "struct")]
    pub struct_name: SmolStr,
    /// Struct field to external input name.
    pub external_field_mapping: BTreeMap<SmolStr, SmolStr>,
}
impl CallGroup {
    /// The externals this group writes when invoked.
    pub fn inputs(&self) -> BTreeSet<&SmolStr> {
        self.external_field_mapping.values().collect()
    }
}

/// A violation of a rename precondition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenameError {
    #[error("Cannot rename component {name:?} that is not part of the circuit")]
    UnknownComponent { name: SmolStr },
    #[error("Cannot rename component {name:?} to {new_name:?}, which is already taken")]
    NameTaken { name: SmolStr, new_name: SmolStr },
    #[error("Cannot rename component {name:?} because {dependent:?} depends on it")]
    DependedOn { name: SmolStr, dependent: SmolStr },
}

/// A circuit-level invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error(transparent)]
    Rename(#[from] RenameError),
    #[error("Tried to add two different definitions for name {name:?}")]
    DefinitionMismatch { name: SmolStr },
    #[error("No definition named {name:?}")]
    UnknownDefinition { name: SmolStr },
    #[error("External {name:?} already exists with a different type or trigger flag")]
    ExternalMismatch { name: SmolStr },
    #[error("Tried to add call struct {name:?}, but a different one already exists")]
    CallStructMismatch { name: SmolStr },
    #[error("Circuit already has call group {name:?}")]
    DuplicateCallGroup { name: SmolStr },
    #[error("Call group {group:?} requested nonexistent call struct {name:?}")]
    UnknownCallStruct { group: SmolStr, name: SmolStr },
    #[error("Call group {group:?} requested field {field:?}, which is not in struct {name:?}")]
    UnknownStructField {
        group: SmolStr,
        name: SmolStr,
        field: SmolStr,
    },
    #[error("Call group {group:?} requested external {external:?}, which does not exist")]
    UnknownExternal { group: SmolStr, external: SmolStr },
    #[error("Call group {group:?} mapped field {field:?} to external {external:?} with different types {field_type:?} and {external_type:?}")]
    CallGroupTypeMismatch {
        group: SmolStr,
        field: SmolStr,
        external: SmolStr,
        field_type: SmolStr,
        external_type: SmolStr,
    },
    #[error("Inserting second component named {name:?} with a distinct structural identity")]
    DuplicateInsert { name: SmolStr },
    #[error("No component named {name:?}")]
    UnknownComponent { name: SmolStr },
}

/// Options for [`Circuit::make_component_with`] beyond the wiring itself.
#[derive(Debug, Default, Clone)]
pub struct ComponentConfig {
    pub output_options: BTreeMap<SmolStr, OutputOptions>,
    pub class_generics: BTreeMap<SmolStr, SmolStr>,
    pub params: Option<BTreeMap<SmolStr, serde_json::Value>>,
    /// Insert even when an equal component already exists.
    pub force_insert: bool,
}

/// A circuit of components wired by typed inputs and outputs.
#[derive(Debug, Default, Clone)]
pub struct Circuit {
    components: Vec<Component>,
    lookup: HashMap<SmolStr, usize>,
    externals: Vec<ExternalInput>,
    external_lookup: HashMap<SmolStr, usize>,
    definitions: BTreeMap<SmolStr, Arc<Definition>>,
    call_structs: BTreeMap<SmolStr, CallStruct>,
    call_groups: BTreeMap<SmolStr, CallGroup>,
    registry: HashMap<ComponentIndex, usize>,
}

impl Circuit {
    /// Create a new, empty circuit.
    pub fn new() -> Self {
        Self::default()
    }

    /// The components in insertion order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }
    /// Look up a component by name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.lookup.get(name).map(|&idx| &self.components[idx])
    }
    /// Look up a component by name for mutation.
    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.lookup
            .get(name)
            .map(|&idx| &mut self.components[idx])
    }
    /// The external inputs in insertion order.
    pub fn externals(&self) -> &[ExternalInput] {
        &self.externals
    }
    pub fn external(&self, name: &str) -> Option<&ExternalInput> {
        self.external_lookup
            .get(name)
            .map(|&idx| &self.externals[idx])
    }
    pub fn definitions(&self) -> &BTreeMap<SmolStr, Arc<Definition>> {
        &self.definitions
    }
    pub fn definition(&self, name: &str) -> Option<&Arc<Definition>> {
        self.definitions.get(name)
    }
    pub fn call_structs(&self) -> &BTreeMap<SmolStr, CallStruct> {
        &self.call_structs
    }
    pub fn call_groups(&self) -> &BTreeMap<SmolStr, CallGroup> {
        &self.call_groups
    }

    /// The outputs of every external flagged `must_trigger`.
    pub fn must_trigger_outputs(&self) -> BTreeSet<ComponentOutput> {
        self.externals
            .iter()
            .filter(|ext| ext.must_trigger)
            .map(ExternalInput::output)
            .collect()
    }

    /// Register a definition under a name. Adding an equal definition twice
    /// is a no-op; adding a different one under the same name fails.
    pub fn add_definition(
        &mut self,
        name: impl Into<SmolStr>,
        definition: Definition,
    ) -> Result<Arc<Definition>, CircuitError> {
        let name = name.into();
        if let Some(existing) = self.definitions.get(&name) {
            if **existing != definition {
                return Err(CircuitError::DefinitionMismatch { name });
            }
            return Ok(existing.clone());
        }
        definition.validate()?;
        let shared = Arc::new(definition);
        self.definitions.insert(name, shared.clone());
        Ok(shared)
    }

    /// Get or create an external input. Idempotent for a matching
    /// `(name, type, must_trigger)` request; a mismatch fails.
    pub fn get_external(
        &mut self,
        name: impl Into<SmolStr>,
        ty: impl Into<SmolStr>,
        must_trigger: bool,
    ) -> Result<&ExternalInput, CircuitError> {
        let name = name.into();
        let ty = ty.into();
        if let Some(&idx) = self.external_lookup.get(&name) {
            let existing = &self.externals[idx];
            if existing.ty != ty || existing.must_trigger != must_trigger {
                return Err(CircuitError::ExternalMismatch { name });
            }
            return Ok(&self.externals[idx]);
        }
        let index = self.externals.len();
        self.externals.push(ExternalInput {
            ty,
            name: name.clone(),
            index: index as u32,
            must_trigger,
        });
        self.external_lookup.insert(name, index);
        Ok(&self.externals[index])
    }

    /// Add a call struct. Idempotent for an equal struct.
    pub fn add_call_struct(
        &mut self,
        name: impl Into<SmolStr>,
        call_struct: CallStruct,
    ) -> Result<(), CircuitError> {
        let name = name.into();
        if let Some(existing) = self.call_structs.get(&name) {
            if *existing != call_struct {
                return Err(CircuitError::CallStructMismatch { name });
            }
            return Ok(());
        }
        self.call_structs.insert(name, call_struct);
        Ok(())
    }

    /// Add a call group, validating its bindings immediately.
    pub fn add_call_group(
        &mut self,
        name: impl Into<SmolStr>,
        group: CallGroup,
    ) -> Result<(), CircuitError> {
        let name = name.into();
        if self.call_groups.contains_key(&name) {
            return Err(CircuitError::DuplicateCallGroup { name });
        }
        self.validate_call_group(&name, &group)?;
        self.call_groups.insert(name, group);
        Ok(())
    }

    fn validate_call_group(&self, name: &SmolStr, group: &CallGroup) -> Result<(), CircuitError> {
        let Some(call_struct) = self.call_structs.get(&group.struct_name) else {
            return Err(CircuitError::UnknownCallStruct {
                group: name.clone(),
                name: group.struct_name.clone(),
            });
        };
        for (field, external_name) in &group.external_field_mapping {
            let Some(field_type) = call_struct.inputs.get(field) else {
                return Err(CircuitError::UnknownStructField {
                    group: name.clone(),
                    name: group.struct_name.clone(),
                    field: field.clone(),
                });
            };
            let Some(external) = self.external(external_name) else {
                return Err(CircuitError::UnknownExternal {
                    group: name.clone(),
                    external: external_name.clone(),
                });
            };
            if external.ty != *field_type {
                return Err(CircuitError::CallGroupTypeMismatch {
                    group: name.clone(),
                    field: field.clone(),
                    external: external_name.clone(),
                    field_type: field_type.clone(),
                    external_type: external.ty.clone(),
                });
            }
        }
        Ok(())
    }

    /// Build a component from a registered definition, validate it, and
    /// insert it with structural deduplication.
    pub fn make_component<N, I>(
        &mut self,
        definition: &str,
        name: N,
        inputs: I,
    ) -> Result<&Component, CircuitError>
    where
        N: Into<SmolStr>,
        I: IntoIterator<Item = (SmolStr, ComponentInput)>,
    {
        self.make_component_with(definition, name, inputs, ComponentConfig::default())
    }

    /// [`Self::make_component`] with output options, generics, parameters,
    /// or a forced insert.
    pub fn make_component_with<N, I>(
        &mut self,
        definition: &str,
        name: N,
        inputs: I,
        config: ComponentConfig,
    ) -> Result<&Component, CircuitError>
    where
        N: Into<SmolStr>,
        I: IntoIterator<Item = (SmolStr, ComponentInput)>,
    {
        let shared = self
            .definitions
            .get(definition)
            .ok_or_else(|| CircuitError::UnknownDefinition {
                name: definition.into(),
            })?
            .clone();
        let component = Component {
            name: name.into(),
            definition: shared,
            inputs: inputs.into_iter().collect(),
            output_options: config.output_options,
            class_generics: config.class_generics,
            params: config.params,
        };
        component.validate(self)?;
        self.insert_component(component, config.force_insert)
    }

    fn insert_component(
        &mut self,
        component: Component,
        force: bool,
    ) -> Result<&Component, CircuitError> {
        if let Some(&idx) = self.lookup.get(&component.name) {
            if self.components[idx] == component && !force {
                return Ok(&self.components[idx]);
            }
            return Err(CircuitError::DuplicateInsert {
                name: component.name.clone(),
            });
        }

        let index = component.index();
        if !force && let Some(&idx) = self.registry.get(&index) {
            let existing = &mut self.components[idx];
            for (output, options) in component.output_options {
                let entry = existing.output_options.entry(output).or_default();
                *entry = entry.strongest_of(options);
            }
            return Ok(&self.components[idx]);
        }

        let idx = self.components.len();
        self.lookup.insert(component.name.clone(), idx);
        if let Entry::Vacant(entry) = self.registry.entry(index) {
            entry.insert(idx);
        }
        self.components.push(component);
        Ok(&self.components[idx])
    }

    /// Push a prebuilt component, deferring validation to the caller. Used
    /// when rebuilding a circuit whose components may reference each other
    /// in any order.
    pub(crate) fn insert_raw(&mut self, component: Component) {
        let idx = self.components.len();
        self.lookup.insert(component.name.clone(), idx);
        if let Entry::Vacant(entry) = self.registry.entry(component.index()) {
            entry.insert(idx);
        }
        self.components.push(component);
    }

    /// Rename a component. The new name must be unused and nothing may
    /// depend on the component yet.
    pub fn rename_component(&mut self, name: &str, new_name: &str) -> Result<(), CircuitError> {
        if name == new_name {
            return Ok(());
        }
        let Some(&idx) = self.lookup.get(name) else {
            return Err(RenameError::UnknownComponent { name: name.into() }.into());
        };
        if self.lookup.contains_key(new_name) {
            return Err(RenameError::NameTaken {
                name: name.into(),
                new_name: new_name.into(),
            }
            .into());
        }
        for other in &self.components {
            if other.name == name {
                continue;
            }
            if other
                .inputs
                .values()
                .any(|input| input.parents().contains(name))
            {
                return Err(RenameError::DependedOn {
                    name: name.into(),
                    dependent: other.name.clone(),
                }
                .into());
            }
        }
        self.lookup.remove(name);
        self.components[idx].name = new_name.into();
        self.lookup.insert(new_name.into(), idx);
        Ok(())
    }

    /// Check every invariant of the whole circuit.
    ///
    /// This also warns about components whose outputs nothing reads; those
    /// are suspicious but not invalid.
    pub fn validate(&self) -> Result<(), CircuitError> {
        for component in &self.components {
            component.validate(self)?;
        }
        for (name, group) in &self.call_groups {
            self.validate_call_group(name, group)?;
        }

        let mut read: BTreeSet<&ComponentOutput> = BTreeSet::new();
        for component in &self.components {
            for input in component.inputs.values() {
                read.extend(input.outputs());
            }
        }
        for component in &self.components {
            if component.definition.output_specs.is_empty() {
                continue;
            }
            let unread = component.definition.output_specs.keys().all(|output| {
                !read.contains(&ComponentOutput::graph(
                    component.name.clone(),
                    output.clone(),
                ))
            });
            if unread {
                tracing::warn!(component = %component.name, "no output of this component is read");
            }
        }
        Ok(())
    }
}
