//! The fixed, ordered capability surface injected into every compiled script.
//!
//! Compiled units are closures over positional parameters, so
//! [`CAPABILITY_PARAMS`] is an ordering contract: reordering or inserting a
//! slot invalidates every cached compilation. The security policy derives its
//! capability-identifier set from this same list, so the two can never drift.

use std::collections::BTreeMap;

use crate::value::Value;

/// Formal parameter list of every compiled unit, in invocation order.
pub const CAPABILITY_PARAMS: &[&str] = &[
    // Raw context values
    "data",
    "events",
    "components",
    "editor",
    "event",
    "item",
    "component",
    "platform",
    "values",
    "apps",
    "vars",
    // Variable accessors
    "GetVar",
    "SetVar",
    "GetGlobalVar",
    "SetGlobalVar",
    // UI feedback
    "ShowToast",
    "ShowError",
    // Application / component / page mutation
    "UpdateApp",
    "GetComponent",
    "AddComponent",
    "AddPage",
    "UpdatePage",
    "DeletePage",
    // Navigation
    "NavigateToPage",
    "NavigateToUrl",
    "NavigateToHash",
    // Component property mutation
    "UpdateInput",
    "UpdateComponentName",
    "UpdateEvent",
    "UpdateStyle",
    "UpdateStyleHandlers",
    "CopyComponent",
    "PasteComponent",
    "DeleteComponent",
    // Editor integration
    "OpenEditorTab",
    "CloseEditorTab",
    // Data operations
    "InstantiateSchema",
    "InvokeFunction",
    "UploadFile",
    "BrowseFiles",
    // Utilities
    "Utils",
    "console",
    "App",
];

/// Facet names of the namespaced `App` convenience object.
pub const APP_FACETS: &[&str] = &[
    "nav",
    "feedback",
    "components",
    "data",
    "pages",
    "application",
    "variables",
];

pub fn is_capability_param(name: &str) -> bool {
    CAPABILITY_PARAMS.contains(&name)
}

/// Position of a slot in the invocation argument list.
pub fn param_index(name: &str) -> Option<usize> {
    CAPABILITY_PARAMS.iter().position(|p| *p == name)
}

/// Builder over the ordered argument vector handed to
/// [`crate::compile::CompiledUnit::invoke`]. Slots default to `undefined`;
/// the embedding runtime fills in whichever capabilities apply to the
/// triggering context.
pub struct CapabilityValues {
    slots: Vec<Value>,
}

impl CapabilityValues {
    pub fn new() -> Self {
        Self {
            slots: vec![Value::Undefined; CAPABILITY_PARAMS.len()],
        }
    }

    /// Fill a slot by name. Unknown names are an embedding bug, not a script
    /// error, so they are reported eagerly.
    pub fn set(&mut self, name: &str, value: Value) -> Result<&mut Self, UnknownSlot> {
        match param_index(name) {
            Some(i) => {
                self.slots[i] = value;
                Ok(self)
            }
            None => Err(UnknownSlot(name.to_string())),
        }
    }

    /// Build the empty namespaced `App` facet object and store it in the
    /// `App` slot. Callers that want populated facets assemble their own
    /// object instead.
    pub fn with_empty_app(&mut self) -> &mut Self {
        let mut facets = BTreeMap::new();
        for facet in APP_FACETS {
            facets.insert(facet.to_string(), Value::object(BTreeMap::new()));
        }
        if let Some(i) = param_index("App") {
            self.slots[i] = Value::object(facets);
        }
        self
    }

    pub fn into_args(self) -> Vec<Value> {
        self.slots
    }
}

impl Default for CapabilityValues {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown capability slot \"{0}\"")]
pub struct UnknownSlot(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_stable() {
        // The first and last slots are load-bearing positions; moving them
        // breaks every cached compilation.
        assert_eq!(CAPABILITY_PARAMS[0], "data");
        assert_eq!(CAPABILITY_PARAMS[CAPABILITY_PARAMS.len() - 1], "App");
        assert!(param_index("GetVar").unwrap() < param_index("SetVar").unwrap());
    }

    #[test]
    fn no_duplicate_slots() {
        let mut seen = std::collections::HashSet::new();
        for p in CAPABILITY_PARAMS {
            assert!(seen.insert(*p), "duplicate capability slot {}", p);
        }
    }

    #[test]
    fn builder_rejects_unknown_slot() {
        let mut caps = CapabilityValues::new();
        assert!(caps.set("GetVar", Value::Undefined).is_ok());
        assert!(caps.set("EraseDisk", Value::Undefined).is_err());
    }
}
