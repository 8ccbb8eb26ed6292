//! Ephemerality: which outputs need storage that persists between calls.

use super::LowerError;
use super::callset::MatchMode;
use super::subgraph::{Subgraph, find_all_subgraphs_with};
use crate::circuit::circuit::Circuit;
use crate::circuit::component::{Component, ComponentOutput};
use std::collections::BTreeSet;

/// The outputs a subgraph reads that are produced outside of it: by an
/// external, or by a component called in some other subgraph.
pub fn cross_subgraph_reads(
    circuit: &Circuit,
    subgraph: &Subgraph,
) -> Result<BTreeSet<ComponentOutput>, LowerError> {
    let own: BTreeSet<&str> = subgraph
        .calls
        .iter()
        .map(|call| call.component.as_str())
        .collect();
    let mut reads = BTreeSet::new();
    for call in &subgraph.calls {
        let component =
            circuit
                .component(&call.component)
                .ok_or_else(|| LowerError::UnknownComponent {
                    name: call.component.clone(),
                })?;
        for input in component.inputs.values() {
            for output in input.outputs() {
                if !own.contains(output.parent()) {
                    reads.insert(output.clone());
                }
            }
        }
    }
    Ok(reads)
}

/// The union, over every subgraph, of the outputs read across a subgraph
/// boundary. Everything else can live in per-invocation scratch space.
pub fn all_nonephemeral_outputs(circuit: &Circuit) -> Result<BTreeSet<ComponentOutput>, LowerError> {
    all_nonephemeral_outputs_with(circuit, MatchMode::default())
}

/// [`all_nonephemeral_outputs`] with an explicit freshness-matching mode.
pub fn all_nonephemeral_outputs_with(
    circuit: &Circuit,
    mode: MatchMode,
) -> Result<BTreeSet<ComponentOutput>, LowerError> {
    let mut nonephemeral = BTreeSet::new();
    for subgraph in find_all_subgraphs_with(circuit, mode)? {
        nonephemeral.extend(cross_subgraph_reads(circuit, &subgraph)?);
    }
    Ok(nonephemeral)
}

/// Whether an output may live in per-invocation scratch space.
///
/// An output read from another subgraph must normally persist, unless it is
/// assumed invalid or default, in which case its value is reconstituted on
/// every invocation anyway. Storage requests from the spec or the component
/// options always win.
pub fn is_ephemeral(
    component: &Component,
    output: &str,
    nonephemeral: &BTreeSet<ComponentOutput>,
) -> bool {
    let Some(spec) = component.definition.output_specs.get(output) else {
        return false;
    };
    let must_store = component
        .output_options
        .get(output)
        .is_some_and(|options| options.force_stored);
    let needs_write = spec.assume_invalid || spec.assume_default;
    let read_elsewhere =
        nonephemeral.contains(&ComponentOutput::graph(component.name.clone(), output));
    spec.ephemeral && !must_store && (!read_elsewhere || needs_write)
}
