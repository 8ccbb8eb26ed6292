//! Convenience generators for common component definitions.
//!
//! These are sugar over [`Circuit::make_component`]: they synthesize the
//! definition for a binary operator or a constant, register it, and insert a
//! component wired to the given sources.

use super::circuit::{Circuit, CircuitError};
use super::component::{Component, ComponentInput, ComponentOutput};
use super::definition::{CallSpec, Definition, InputSpec, OutputSpec};
use smol_str::{SmolStr, format_smolstr};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A name that has not been used by any previous call to this function.
pub fn novel_name(prefix: &str) -> SmolStr {
    let n = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format_smolstr!("{prefix}{n}")
}

fn clean_type_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
        .replace('{', "l")
        .replace('}', "r")
}

/// The definition of a binary operator component.
///
/// The operator takes inputs `a` and `b`, produces an ephemeral `out`, and
/// fires its generic callset whenever either side is written.
pub fn binary_definition(operator: &str, class_name: &str) -> Definition {
    Definition {
        class_name: class_name.into(),
        header: "signals/basic_arithmetic.hh".into(),
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
            input_struct_path: Some("Input".into()),
            ..CallSpec::default()
        }),
        generics_order: BTreeMap::from([("a".into(), 0), ("b".into(), 1)]),
        differentiable_operator_name: Some(operator.into()),
        ..Definition::default()
    }
}

/// The definition of a constant source: an always-valid, assumed-default
/// output with no inputs.
pub fn constant_definition(constant_type: &str, constructor: &str) -> Definition {
    Definition {
        class_name: format_smolstr!("CtorConstant<{constant_type}>"),
        header: "signals/constant.hh".into(),
        output_specs: BTreeMap::from([("out".into(), {
            let mut spec = OutputSpec::new("Output");
            spec.ephemeral = true;
            spec.always_valid = true;
            spec.assume_default = true;
            spec.default_constructor = Some(format_smolstr!(" = {constructor}"));
            spec
        })]),
        differentiable_operator_name: Some("constant".into()),
        metadata: BTreeMap::from([("constant_value".into(), constructor.into())]),
        ..Definition::default()
    }
}

impl Circuit {
    /// Insert a binary operator component over two existing outputs.
    pub fn make_binary(
        &mut self,
        operator: &str,
        class_name: &str,
        a: ComponentOutput,
        b: ComponentOutput,
    ) -> Result<&Component, CircuitError> {
        self.add_definition(operator, binary_definition(operator, class_name))?;
        self.make_component(
            operator,
            novel_name(operator),
            [
                (SmolStr::new_static("a"), ComponentInput::Single(a)),
                (SmolStr::new_static("b"), ComponentInput::Single(b)),
            ],
        )
    }

    /// Insert a constant of the given type, deduplicated per constructor.
    pub fn make_constant(
        &mut self,
        constant_type: &str,
        constructor: Option<&str>,
    ) -> Result<&Component, CircuitError> {
        let ctor = constructor.unwrap_or("{}");
        let def_name = format_smolstr!("constant_{constant_type}_{ctor}");
        self.add_definition(
            def_name.clone(),
            constant_definition(constant_type, ctor),
        )?;
        let name: SmolStr = clean_type_name(&def_name).into();
        self.make_component(&def_name, name, [])
    }
}
