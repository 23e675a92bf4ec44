//! # Script Engine Ground Truth
//!
//! Validation, compilation and safe execution of untrusted user scripts for
//! the visual application builder.
//!
//! ## Pipeline Invariants
//!
//! 1. **Validation precedes everything**: no script text reaches lowering,
//!    caching or execution without passing the Syntax Analyzer on that same
//!    call. Cached artifacts only prove the text passed before; the cache
//!    still revalidates on every `compile`.
//!
//! 2. **Wrapper parsing**: scripts are parsed as
//!    `(async function () {\n<body>\n})` so a bare top-level `return` and
//!    `await` are legal. Every line/column reported to a caller is mapped
//!    back into the unwrapped script text.
//!
//! 3. **Capability order is a contract**: compiled units bind the fixed
//!    [`capability::CAPABILITY_PARAMS`] list positionally. Reordering or
//!    inserting a slot invalidates every cached compilation.
//!
//! 4. **Shadowing wins**: a local declaration of any capability-like or
//!    forbidden-like name makes that identifier the script's own. Pass 1 of
//!    the analyzer inventories bindings precisely so pass 2 never misreports
//!    a legitimate local.
//!
//! 5. **Violations accumulate**: validation returns every violation it can
//!    find, never just the first.
//!
//! 6. **Complexity is advisory except at the SSR gate**: complexity analysis
//!    never rejects a save; it only blocks server-side rendering and feeds
//!    editor warnings. It fails open on parse errors, which belong to the
//!    Syntax Analyzer.
//!
//! 7. **Execution is budgeted**: the interpreter carries a step budget and a
//!    call-depth limit; budget exhaustion cannot be caught by script `try`
//!    blocks.

mod analyzer;
mod capability;
mod compile;
mod complexity;
mod guard;
mod interp;
pub mod ir;
mod lower;
mod overlay;
mod parse;
mod policy;
mod value;

#[cfg(test)]
mod safety_tests;
#[cfg(test)]
mod complexity_tests;
#[cfg(test)]
mod interp_tests;

pub use analyzer::{
    validate, validation_failure, ValidationError, ValidationFailure, ValidationResult,
};
pub use capability::{
    is_capability_param, param_index, CapabilityValues, UnknownSlot, APP_FACETS,
    CAPABILITY_PARAMS,
};
pub use compile::{
    compile_script, CompileError, CompileMode, CompiledUnit, ScriptCache,
};
pub use complexity::{
    analyze, is_safe_for_server_render, warnings_for, ComplexityResult, MAX_LOOP_COUNT,
    MAX_NESTING_DEPTH, MAX_NODE_COUNT,
};
pub use guard::{ChildBatch, Debouncer, ExecutionGuard};
pub use interp::{root_env, Env, Interp, RuntimeError, Scope, MAX_CALL_DEPTH, STEP_LIMIT};
pub use policy::{
    describe_violation, is_capability_identifier, is_forbidden_global, is_forbidden_property,
    is_safe_builtin, ViolationKind,
};
pub use value::{Closure, NativeFunction, Value};
