//! Lowering: from a validated circuit to per-entry-point execution plans.

pub mod annotate;
pub mod callset;
pub mod ephemeral;
pub mod subgraph;

pub use annotate::{AnnotatedComponent, GraphValid, GraphVar, GraphVariable, annotate};
pub use callset::{MatchMode, ResolveError, resolve_callsets};
pub use ephemeral::{all_nonephemeral_outputs, is_ephemeral};
pub use subgraph::{CalledComponent, Subgraph, SubgraphTrigger, find_all_subgraphs};

use crate::circuit::circuit::CircuitError;
use smol_str::SmolStr;
use thiserror::Error;

/// A failure while lowering a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error(transparent)]
    Invalid(#[from] CircuitError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Subgraph references unknown component {name:?}")]
    UnknownComponent { name: SmolStr },
    #[error("Component {component:?} has no output spec for {output:?}")]
    UnknownOutput { component: SmolStr, output: SmolStr },
}
