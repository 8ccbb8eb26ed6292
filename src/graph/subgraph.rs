//! Subgraph discovery: the ordered component calls reachable from each entry
//! point.
//!
//! Discovery runs in two passes. The first is a conservative fixed-point
//! topological sort that over-approximates which components may fire, since
//! exact triggering depends on callset resolution, which itself depends on
//! ordering. The second pass walks the sorted list with an exact freshness
//! set and resolves the callsets that actually fire.

use super::LowerError;
use super::callset::{MatchMode, resolve_callsets};
use crate::circuit::circuit::Circuit;
use crate::circuit::component::{Component, ComponentOutput};
use crate::circuit::definition::CallSpec;
use smol_str::SmolStr;
use std::collections::BTreeSet;

/// One component occurrence in a subgraph: the callsets that fire for it, in
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalledComponent {
    pub component: SmolStr,
    pub callsets: Vec<CallSpec>,
}

/// What kicks a subgraph off.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubgraphTrigger {
    /// An external call group writing its bound externals.
    CallGroup(SmolStr),
    /// A component's timer callset firing.
    Timer(SmolStr),
}

/// The ordered list of component calls triggered by one entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subgraph {
    pub trigger: SubgraphTrigger,
    pub calls: Vec<CalledComponent>,
}
impl Subgraph {
    /// The names of the components called in this subgraph.
    pub fn called_names(&self) -> BTreeSet<&SmolStr> {
        self.calls.iter().map(|call| &call.component).collect()
    }
}

/// Conservative topological order of the components reachable from the seed
/// outputs: a component sorts as soon as any triggering input has a source in
/// the used set, and contributes its definition's full output set.
fn conservative_order<'c>(
    circuit: &'c Circuit,
    seed: &BTreeSet<ComponentOutput>,
) -> Vec<&'c Component> {
    let mut used = seed.clone();
    let mut sorted = Vec::new();
    let mut done = vec![false; circuit.components().len()];

    let mut rounds = 0usize;
    loop {
        rounds += 1;
        let mut did_work = false;
        for (idx, component) in circuit.components().iter().enumerate() {
            if done[idx] {
                continue;
            }
            let triggered = component
                .triggering_inputs()
                .flat_map(|input| input.outputs())
                .any(|output| used.contains(output));
            if triggered {
                used.extend(
                    component
                        .definition
                        .outputs()
                        .map(|output| ComponentOutput::graph(component.name.clone(), output.clone())),
                );
                done[idx] = true;
                sorted.push(component);
                did_work = true;
            }
        }
        if !did_work {
            break;
        }
    }
    tracing::debug!(rounds, sorted = sorted.len(), "conservative sort finished");
    sorted
}

/// Exact propagation over a conservatively sorted list: resolve the callsets
/// that fire for each component given what has actually been written so far.
/// Skippable callsets keep their position in the order but are not emitted.
fn propagate(
    order: &[&Component],
    seed: &BTreeSet<ComponentOutput>,
    mode: MatchMode,
) -> Result<Vec<CalledComponent>, LowerError> {
    let mut seen = seed.clone();
    let mut calls = Vec::new();
    for component in order {
        let triggered = component
            .triggering_inputs()
            .flat_map(|input| input.outputs())
            .any(|output| seen.contains(output));
        if !triggered {
            continue;
        }
        let resolved = resolve_callsets(component, &seen, mode)?;
        let fired: Vec<CallSpec> = resolved
            .into_iter()
            .filter(|callset| !callset.skippable())
            .cloned()
            .collect();
        for callset in &fired {
            seen.extend(
                callset
                    .outputs
                    .iter()
                    .map(|output| ComponentOutput::graph(component.name.clone(), output.clone())),
            );
        }
        if !fired.is_empty() {
            calls.push(CalledComponent {
                component: component.name.clone(),
                callsets: fired,
            });
        }
    }
    Ok(calls)
}

/// The calls reached from a set of already-written outputs.
pub fn children_of_outputs(
    circuit: &Circuit,
    seed: &BTreeSet<ComponentOutput>,
    mode: MatchMode,
) -> Result<Vec<CalledComponent>, LowerError> {
    let order = conservative_order(circuit, seed);
    propagate(&order, seed, mode)
}

/// Discover every subgraph of a validated circuit: one per call group, then
/// one per component with a timer callset.
pub fn find_all_subgraphs(circuit: &Circuit) -> Result<Vec<Subgraph>, LowerError> {
    find_all_subgraphs_with(circuit, MatchMode::default())
}

/// [`find_all_subgraphs`] with an explicit freshness-matching mode.
pub fn find_all_subgraphs_with(
    circuit: &Circuit,
    mode: MatchMode,
) -> Result<Vec<Subgraph>, LowerError> {
    let _guard = tracing::info_span!("find_subgraphs").entered();
    circuit.validate().map_err(LowerError::Invalid)?;

    let mut subgraphs = Vec::new();
    for (name, group) in circuit.call_groups() {
        let seed: BTreeSet<ComponentOutput> = group
            .inputs()
            .into_iter()
            .map(|external| ComponentOutput::external(external.clone()))
            .collect();
        let calls = children_of_outputs(circuit, &seed, mode)?;
        if calls.is_empty() {
            tracing::warn!(group = %name, "call group triggers no components");
        }
        subgraphs.push(Subgraph {
            trigger: SubgraphTrigger::CallGroup(name.clone()),
            calls,
        });
    }

    for component in circuit.components() {
        let Some(timer) = &component.definition.timer_callset else {
            continue;
        };
        let seed: BTreeSet<ComponentOutput> = timer
            .outputs
            .iter()
            .map(|output| ComponentOutput::graph(component.name.clone(), output.clone()))
            .collect();
        let mut calls = vec![CalledComponent {
            component: component.name.clone(),
            callsets: vec![timer.clone()],
        }];
        calls.extend(children_of_outputs(circuit, &seed, mode)?);
        subgraphs.push(Subgraph {
            trigger: SubgraphTrigger::Timer(component.name.clone()),
            calls,
        });
    }

    Ok(subgraphs)
}
