//! Component property table.
//!
//! The topology is read-only here: the optimizer queries per-component
//! properties (accumulation, in-place capability, side effects, declared
//! dimensions) but never inspects the numeric kernels themselves.

use crate::{Error, Result};

/// Identifier of a component: an index into `Topology::components`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(pub usize);

impl ComponentId {
    /// Create a new component id.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Declared properties of one component.
///
/// These are compile-time facts about the component's kernels; the analysis
/// relies on them being accurate, exactly as it relies on command operands.
#[derive(Debug, Clone)]
pub struct Component {
    /// Human-readable name, used in diagnostics only.
    pub name: String,

    /// Column count every propagate input / backprop input-derivative must have.
    pub input_dim: usize,

    /// Column count every propagate output / backprop output-derivative must have.
    pub output_dim: usize,

    /// Propagate adds into its output rather than overwriting it.
    pub propagate_adds: bool,

    /// Backprop adds into the input derivative rather than overwriting it.
    pub backprop_adds: bool,

    /// Propagate may write its output into the same buffer as its input.
    pub propagate_in_place: bool,

    /// Backprop may write the input derivative into the output derivative's buffer.
    pub backprop_in_place: bool,

    /// Backprop updates internal parameters: an effect not captured by the
    /// command's declared writes. Such commands are never eliminated.
    pub updates_parameters: bool,
}

impl Component {
    /// Create a component with the given dimensions and all properties off.
    pub fn new(name: impl Into<String>, input_dim: usize, output_dim: usize) -> Self {
        Self {
            name: name.into(),
            input_dim,
            output_dim,
            propagate_adds: false,
            backprop_adds: false,
            propagate_in_place: false,
            backprop_in_place: false,
            updates_parameters: false,
        }
    }
}

/// The fixed set of components a computation may invoke.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub components: Vec<Component>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component and return its id.
    pub fn add_component(&mut self, component: Component) -> ComponentId {
        let id = ComponentId::new(self.components.len());
        self.components.push(component);
        id
    }

    /// Look up a component by id.
    pub fn component(&self, id: ComponentId) -> Result<&Component> {
        self.components
            .get(id.index())
            .ok_or_else(|| Error::Internal(format!("component {:?} not found", id)))
    }

    /// Number of components.
    pub fn num_components(&self) -> usize {
        self.components.len()
    }
}
