//! Script compilation and the compiled-unit cache.
//!
//! Compilation always revalidates: the cache only ever holds artifacts whose
//! source passed the security policy at compile time. Cache keys combine a
//! content hash of the script text with the compile mode, so the plain and
//! scope-overlay forms of the same script coexist.

use std::collections::HashMap;
use std::rc::Rc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::analyzer::{self, ValidationError};
use crate::capability::CAPABILITY_PARAMS;
use crate::interp::{self, Interp, RuntimeError};
use crate::ir::Stmt;
use crate::lower;
use crate::overlay;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("script rejected by security validation: {message}")]
    Rejected {
        message: String,
        errors: Vec<ValidationError>,
    },
    #[error("unsupported construct ({construct}) at line {line}, column {column}")]
    Unsupported {
        construct: String,
        line: u32,
        column: u32,
    },
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompileMode {
    /// Identifiers resolve against the invocation environment as-is.
    Plain,
    /// Free variable reads and writes are rewritten into `GetVar`/`SetVar`
    /// capability calls for live-preview evaluation.
    ScopeOverlay,
}

impl CompileMode {
    fn tag(self) -> &'static str {
        match self {
            CompileMode::Plain => "plain",
            CompileMode::ScopeOverlay => "scope-overlay",
        }
    }
}

/// A validated, lowered script ready for repeated invocation.
#[derive(Debug)]
pub struct CompiledUnit {
    pub mode: CompileMode,
    pub hash: String,
    body: Rc<Vec<Stmt>>,
}

impl CompiledUnit {
    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    /// Run the unit with capability values bound positionally. Missing
    /// trailing arguments bind as `undefined`, matching a JS call with fewer
    /// arguments than parameters.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        let root = interp::root_env();
        let scope = interp::Scope::child(&root);
        for (i, param) in CAPABILITY_PARAMS.iter().enumerate() {
            scope.define(param, args.get(i).cloned().unwrap_or(Value::Undefined));
        }
        Interp::default().run(&self.body, &scope)
    }
}

fn content_hash(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cache_key(hash: &str, mode: CompileMode) -> String {
    format!("{}:{}", hash, mode.tag())
}

/// A script whose whole body is a single expression statement returns that
/// expression's value. Any explicit `return` or top-level control flow keeps
/// the body as written.
fn rewrite_implicit_return(mut body: Vec<Stmt>) -> Vec<Stmt> {
    let implicit = body.len() == 1
        && matches!(body[0], Stmt::Expr(_))
        && !body.iter().any(Stmt::is_control_flow);
    if implicit {
        if let Some(Stmt::Expr(e)) = body.pop() {
            body.push(Stmt::Return(Some(e)));
        }
    }
    body
}

fn check_policy(script: &str) -> Result<(), CompileError> {
    let result = analyzer::validate(script);
    if result.valid {
        return Ok(());
    }
    let message = result
        .errors
        .iter()
        .map(|e| format!("line {}, column {}: {}", e.line, e.column, e.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(CompileError::Rejected {
        message,
        errors: result.errors,
    })
}

fn lower_unit(script: &str, mode: CompileMode) -> Result<CompiledUnit, CompileError> {
    let mut body = rewrite_implicit_return(lower::lower_script(script)?);
    if mode == CompileMode::ScopeOverlay {
        body = overlay::rewrite(body);
    }
    Ok(CompiledUnit {
        mode,
        hash: content_hash(script),
        body: Rc::new(body),
    })
}

/// Content-addressed cache of compiled units.
#[derive(Default)]
pub struct ScriptCache {
    entries: HashMap<String, Rc<CompiledUnit>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a script, or return the cached unit when the same text has
    /// already been compiled in the same mode. Validation runs on every call
    /// even for cache hits.
    pub fn compile(
        &mut self,
        script: &str,
        mode: CompileMode,
    ) -> Result<Rc<CompiledUnit>, CompileError> {
        check_policy(script)?;

        let key = cache_key(&content_hash(script), mode);
        if let Some(unit) = self.entries.get(&key) {
            log::debug!("script cache hit for {}", key);
            return Ok(Rc::clone(unit));
        }

        let unit = Rc::new(lower_unit(script, mode)?);
        self.entries.insert(key, Rc::clone(&unit));
        Ok(unit)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One-shot compile without a cache.
pub fn compile_script(script: &str, mode: CompileMode) -> Result<CompiledUnit, CompileError> {
    check_policy(script)?;
    lower_unit(script, mode)
}
