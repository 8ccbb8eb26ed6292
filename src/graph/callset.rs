//! Callset resolution: which of a component's update rules fire for a given
//! set of freshly produced outputs.

use crate::circuit::component::{Component, ComponentOutput};
use crate::circuit::definition::CallSpec;
use smallvec::SmallVec;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// How a written input with several sources counts as fresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Any fresh source makes the input fresh. Partial batches match.
    #[default]
    AnyFresh,
    /// Every source must be fresh. Strict, no partial batches.
    AllFresh,
}

/// A callset-resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Component {component} had no matching callset and no generic callset defined")]
    NoMatchingCallset { component: SmolStr },
    #[error("Component {component} had multiple matching callsets and no matching callset group: {names:?}")]
    AmbiguousCallsets {
        component: SmolStr,
        names: Vec<SmolStr>,
    },
    #[error("Component {component} had multiple matching callsets and some had no name for disambiguation")]
    UnnameableAmbiguity { component: SmolStr },
}

/// Every callset whose written set is covered by the fresh outputs.
///
/// A written input that is declared optional and left unwired has no fresh
/// source, so any callset writing it cannot match.
pub fn find_matching_callsets<'a>(
    component: &'a Component,
    fresh: &BTreeSet<ComponentOutput>,
    mode: MatchMode,
) -> Vec<&'a CallSpec> {
    component
        .definition
        .callsets
        .iter()
        .filter(|callset| {
            callset.written_set.iter().all(|input| {
                component.inputs.get(input).is_some_and(|wired| {
                    let outputs = wired.outputs();
                    match mode {
                        MatchMode::AnyFresh => {
                            outputs.iter().any(|output| fresh.contains(*output))
                        }
                        MatchMode::AllFresh => {
                            !outputs.is_empty()
                                && outputs.iter().all(|output| fresh.contains(*output))
                        }
                    }
                })
            })
        })
        .collect()
}

/// The ordered list of callsets that fire for the fresh outputs.
///
/// A single match wins outright. Several matches must all be named and
/// covered by exactly one callset group, whose order decides firing order.
/// No match at all falls back to the generic callset.
pub fn resolve_callsets<'a>(
    component: &'a Component,
    fresh: &BTreeSet<ComponentOutput>,
    mode: MatchMode,
) -> Result<SmallVec<[&'a CallSpec; 1]>, ResolveError> {
    let matches = find_matching_callsets(component, fresh, mode);
    match matches.len() {
        0 => component
            .definition
            .generic_callset
            .as_ref()
            .map(|generic| SmallVec::from_slice(&[generic]))
            .ok_or_else(|| ResolveError::NoMatchingCallset {
                component: component.name.clone(),
            }),
        1 => Ok(SmallVec::from_vec(matches)),
        _ => disambiguate(component, matches),
    }
}

fn disambiguate<'a>(
    component: &'a Component,
    matches: Vec<&'a CallSpec>,
) -> Result<SmallVec<[&'a CallSpec; 1]>, ResolveError> {
    let mut by_name = BTreeMap::new();
    for callset in matches {
        let Some(name) = &callset.name else {
            return Err(ResolveError::UnnameableAmbiguity {
                component: component.name.clone(),
            });
        };
        by_name.insert(name, callset);
    }
    let names: BTreeSet<&SmolStr> = by_name.keys().copied().collect();

    for group in &component.definition.callset_groups {
        if group.names() == names {
            return Ok(group
                .callsets
                .iter()
                .filter_map(|name| by_name.get(name).copied())
                .collect());
        }
    }
    Err(ResolveError::AmbiguousCallsets {
        component: component.name.clone(),
        names: names.into_iter().cloned().collect(),
    })
}
