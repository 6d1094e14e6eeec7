//! Simulated DNAs: the zome functions a simulated cell answers.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use trellis_env::BackendError;

/// Behaviour of one simulated zome function.
#[derive(Debug, Clone, PartialEq)]
pub enum ZomeFunction {
    /// Returns the payload unchanged
    Echo,

    /// Stores the payload as an entry and gossips it to peer cells
    Publish,

    /// Returns every entry this cell has seen, in publish order
    List,

    /// Always returns this value
    Respond(Value),

    /// Always fails with this error body
    Reject(Value),
}

/// What the conductor has to do to answer a call.
pub(crate) enum Dispatch {
    Done(Result<Value, BackendError>),
    Publish(Value),
    List,
}

impl ZomeFunction {
    pub(crate) fn dispatch(&self, payload: Value) -> Dispatch {
        match self {
            ZomeFunction::Echo => Dispatch::Done(Ok(payload)),
            ZomeFunction::Respond(value) => Dispatch::Done(Ok(value.clone())),
            ZomeFunction::Reject(body) => Dispatch::Done(Err(BackendError::CallRejected(body.clone()))),
            ZomeFunction::Publish => Dispatch::Publish(payload),
            ZomeFunction::List => Dispatch::List,
        }
    }
}

/// A simulated DNA: zomes and their functions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimDna {
    name: String,
    zomes: BTreeMap<String, BTreeMap<String, ZomeFunction>>,
}

/// Zome holding the built-in `echo`, `publish` and `list` functions.
pub const TEST_ZOME: &str = "test";

impl SimDna {
    /// Creates a DNA with no zomes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zomes: BTreeMap::new(),
        }
    }

    /// Creates a DNA with the built-in `test` zome.
    pub fn standard(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_function(TEST_ZOME, "echo", ZomeFunction::Echo)
            .with_function(TEST_ZOME, "publish", ZomeFunction::Publish)
            .with_function(TEST_ZOME, "list", ZomeFunction::List)
    }

    /// The DSL test DNA: the built-in zome plus an `interpreter` zome whose
    /// `test_output` reports a compiled program.
    pub fn scaffolding() -> Self {
        Self::standard("scaffolding").with_function(
            "interpreter",
            "test_output",
            ZomeFunction::Respond(json!({ "program": "rep_dsl_test", "compiled": true })),
        )
    }

    /// Adds or replaces a zome function.
    pub fn with_function(
        mut self,
        zome: impl Into<String>,
        function: impl Into<String>,
        behaviour: ZomeFunction,
    ) -> Self {
        self.zomes
            .entry(zome.into())
            .or_default()
            .insert(function.into(), behaviour);
        self
    }

    /// Returns the bundle name this DNA answers for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a zome function.
    pub fn function(&self, zome: &str, function: &str) -> Option<&ZomeFunction> {
        self.zomes.get(zome)?.get(function)
    }
}

/// Error body returned for calls to functions the DNA does not define.
pub(crate) fn not_found(zome: &str, function: &str) -> BackendError {
    BackendError::CallRejected(json!({
        "kind": "zome_function_not_found",
        "zome": zome,
        "function": function,
    }))
}
