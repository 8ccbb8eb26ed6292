pub mod circuit;
pub mod component;
pub mod definition;
pub mod serialized;
pub mod signals;

pub mod prelude {
    pub use super::circuit::{
        CallGroup, CallStruct, Circuit, CircuitError, ComponentConfig, ExternalInput,
    };
    pub use super::component::{
        Component, ComponentError, ComponentInput, ComponentOutput, OutputOptions,
    };
    pub use super::definition::{
        CallSpec, CallsetGroup, Definition, DefinitionError, InputMetadata, InputSpec, OutputSpec,
    };
}

#[cfg(test)]
mod tests;
