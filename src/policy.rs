//! Security policy: the static tables every validation pass consults.
//!
//! Pure predicates over one-time-computed identifier sets. The capability
//! set is derived from [`crate::capability::CAPABILITY_PARAMS`] so the policy
//! and the compiler can never disagree about which identifiers are
//! legitimately injected.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::capability::CAPABILITY_PARAMS;

lazy_static::lazy_static! {
    /// Host globals a script must never reach: code evaluation, the global
    /// object itself, process/OS introspection, module loading, durable
    /// storage, and raw network primitives.
    static ref FORBIDDEN_GLOBALS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        // Code evaluation
        s.insert("eval");
        s.insert("Function");
        // The global object, under all its aliases
        s.insert("window");
        s.insert("globalThis");
        s.insert("self");
        s.insert("top");
        s.insert("parent");
        s.insert("frames");
        s.insert("global");
        s.insert("document");
        // Process / OS introspection
        s.insert("process");
        s.insert("Deno");
        s.insert("navigator");
        // Module loading
        s.insert("require");
        s.insert("module");
        s.insert("exports");
        s.insert("importScripts");
        // Durable storage
        s.insert("localStorage");
        s.insert("sessionStorage");
        s.insert("indexedDB");
        // Raw network / workers
        s.insert("fetch");
        s.insert("XMLHttpRequest");
        s.insert("WebSocket");
        s.insert("EventSource");
        s.insert("Worker");
        s.insert("SharedWorker");
        s
    };

    /// The classic prototype-pollution vectors, forbidden under dot and
    /// bracket-with-literal access alike.
    static ref FORBIDDEN_PROPERTIES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("__proto__");
        s.insert("constructor");
        s.insert("prototype");
        s
    };

    /// Universally safe built-ins scripts may always name.
    static ref SAFE_BUILTINS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("Math");
        s.insert("JSON");
        s.insert("Date");
        s.insert("String");
        s.insert("Number");
        s.insert("Boolean");
        s.insert("Array");
        s.insert("Object");
        s.insert("Map");
        s.insert("Set");
        s.insert("undefined");
        s.insert("NaN");
        s.insert("Infinity");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("isNaN");
        s.insert("isFinite");
        s.insert("encodeURI");
        s.insert("decodeURI");
        s.insert("encodeURIComponent");
        s.insert("decodeURIComponent");
        s
    };

    static ref CAPABILITY_IDENTIFIERS: HashSet<&'static str> =
        CAPABILITY_PARAMS.iter().copied().collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    Syntax,
    ForbiddenGlobal,
    ForbiddenProperty,
    ForbiddenCall,
    ForbiddenDynamicImport,
}

pub fn is_forbidden_global(name: &str) -> bool {
    FORBIDDEN_GLOBALS.contains(name)
}

pub fn is_forbidden_property(name: &str) -> bool {
    FORBIDDEN_PROPERTIES.contains(name)
}

pub fn is_capability_identifier(name: &str) -> bool {
    CAPABILITY_IDENTIFIERS.contains(name)
}

pub fn is_safe_builtin(name: &str) -> bool {
    SAFE_BUILTINS.contains(name)
}

/// One-line, user-facing description of a policy violation.
pub fn describe_violation(kind: ViolationKind, identifier: Option<&str>) -> String {
    let name = identifier.unwrap_or("<unknown>");
    match kind {
        ViolationKind::Syntax => format!("Script is not valid syntax near \"{}\".", name),
        ViolationKind::ForbiddenGlobal => {
            format!("Access to global \"{}\" is not allowed in scripts.", name)
        }
        ViolationKind::ForbiddenProperty => {
            format!("Property \"{}\" cannot be accessed from scripts.", name)
        }
        ViolationKind::ForbiddenCall => {
            format!("Calling \"{}\" is not allowed in scripts.", name)
        }
        ViolationKind::ForbiddenDynamicImport => {
            "Dynamic import is not allowed in scripts.".to_string()
        }
    }
}
