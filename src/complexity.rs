//! Script complexity analysis for the server-side-render gate.
//!
//! Orthogonal to security validation: a script can be perfectly safe under
//! the policy yet too expensive to run while rendering on the server. This
//! walk is independent of the Syntax Analyzer and fails open on parse errors
//! — malformed scripts are the analyzer's responsibility to report, not ours.

use std::collections::{HashMap, HashSet};

use oxc_allocator::Allocator;
use oxc_ast::ast::Expression;
use oxc_ast::AstKind;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use serde::{Deserialize, Serialize};

use crate::parse::{script_source_type, unwrap_body, wrap_script};

pub const MAX_NODE_COUNT: u32 = 1000;
pub const MAX_NESTING_DEPTH: u32 = 15;
pub const MAX_LOOP_COUNT: u32 = 5;

/// Fraction of a hard limit at which advisory warnings start.
const WARN_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityResult {
    pub node_count: u32,
    pub max_depth: u32,
    pub has_loop: bool,
    pub loop_count: u32,
    pub potential_recursion: bool,
    pub exceeds_limits: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Analyze the shape of a script's syntax tree. Parse failures yield the
/// zeroed, "safe" default result.
pub fn analyze(script: &str) -> ComplexityResult {
    let wrapped = wrap_script(script);
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &wrapped, script_source_type()).parse();
    if !ret.errors.is_empty() {
        return ComplexityResult::default();
    }
    let Some(body) = unwrap_body(&ret.program) else {
        return ComplexityResult::default();
    };

    let mut walker = ComplexityWalker::default();
    for stmt in &body.statements {
        walker.visit_statement(stmt);
    }

    // A function is potentially recursive when its own name is reachable as
    // a call target from inside its body, directly or through other declared
    // functions it calls. A helper that is merely declared and called from
    // elsewhere never flags.
    let potential_recursion = walker
        .function_names
        .iter()
        .any(|name| calls_reach(name, name, &walker.calls_within));

    let mut failures = vec![];
    if walker.node_count > MAX_NODE_COUNT {
        failures.push(format!(
            "node count {} exceeds limit {}",
            walker.node_count, MAX_NODE_COUNT
        ));
    }
    if walker.max_depth > MAX_NESTING_DEPTH {
        failures.push(format!(
            "nesting depth {} exceeds limit {}",
            walker.max_depth, MAX_NESTING_DEPTH
        ));
    }
    if walker.loop_count > MAX_LOOP_COUNT {
        failures.push(format!(
            "loop count {} exceeds limit {}",
            walker.loop_count, MAX_LOOP_COUNT
        ));
    }

    ComplexityResult {
        node_count: walker.node_count,
        max_depth: walker.max_depth,
        has_loop: walker.loop_count > 0,
        loop_count: walker.loop_count,
        potential_recursion,
        exceeds_limits: !failures.is_empty(),
        reason: if failures.is_empty() {
            None
        } else {
            Some(failures.join("; "))
        },
    }
}

/// Hard gate for running a script during server-side rendering. Potential
/// recursion blocks SSR even under the thresholds: the heuristic cannot prove
/// termination and a hung render worker is worse than a client-side fallback.
pub fn is_safe_for_server_render(script: &str) -> bool {
    let result = analyze(script);
    !result.exceeds_limits && !result.potential_recursion
}

/// Advisory, non-blocking warnings for scripts approaching the limits.
pub fn warnings_for(script: &str) -> Vec<String> {
    let result = analyze(script);
    let mut warnings = vec![];

    if f64::from(result.node_count) > f64::from(MAX_NODE_COUNT) * WARN_RATIO {
        warnings.push(format!(
            "Script is large: {} of {} allowed syntax nodes.",
            result.node_count, MAX_NODE_COUNT
        ));
    }
    if f64::from(result.max_depth) > f64::from(MAX_NESTING_DEPTH) * WARN_RATIO {
        warnings.push(format!(
            "Script is deeply nested: depth {} of {} allowed.",
            result.max_depth, MAX_NESTING_DEPTH
        ));
    }
    if result.has_loop {
        warnings.push(format!(
            "Script contains {} loop(s); loops are skipped during server-side rendering.",
            result.loop_count
        ));
    }
    if result.potential_recursion {
        warnings.push(
            "Script may be recursive: a declared function calls itself, directly or through another function.".to_string(),
        );
    }
    warnings
}

/// Depth-first reachability over the declared-function call graph.
fn calls_reach(start: &str, target: &str, graph: &HashMap<String, HashSet<String>>) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = match graph.get(start) {
        Some(targets) => targets.iter().map(String::as_str).collect(),
        None => return false,
    };
    while let Some(name) = stack.pop() {
        if name == target {
            return true;
        }
        if seen.insert(name) {
            if let Some(targets) = graph.get(name) {
                stack.extend(targets.iter().map(String::as_str));
            }
        }
    }
    false
}

#[derive(Default)]
struct ComplexityWalker {
    node_count: u32,
    depth: u32,
    max_depth: u32,
    loop_count: u32,
    function_names: HashSet<String>,
    /// Named functions currently being walked; calls are attributed to every
    /// enclosing named function, so a self-call through a nested closure
    /// still counts.
    named_fn_stack: Vec<String>,
    /// Call targets observed inside each declared function's body.
    calls_within: HashMap<String, HashSet<String>>,
}

fn is_nesting_kind(kind: &AstKind) -> bool {
    matches!(
        kind,
        AstKind::Function(_)
            | AstKind::ArrowFunctionExpression(_)
            | AstKind::BlockStatement(_)
            | AstKind::IfStatement(_)
            | AstKind::WhileStatement(_)
            | AstKind::DoWhileStatement(_)
            | AstKind::ForStatement(_)
            | AstKind::ForInStatement(_)
            | AstKind::ForOfStatement(_)
            | AstKind::SwitchStatement(_)
            | AstKind::TryStatement(_)
    )
}

impl<'a> Visit<'a> for ComplexityWalker {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        self.node_count += 1;

        if is_nesting_kind(&kind) {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }

        match kind {
            AstKind::WhileStatement(_)
            | AstKind::DoWhileStatement(_)
            | AstKind::ForStatement(_)
            | AstKind::ForInStatement(_)
            | AstKind::ForOfStatement(_) => {
                self.loop_count += 1;
            }
            AstKind::Function(func) => {
                if let Some(id) = &func.id {
                    self.function_names.insert(id.name.to_string());
                    self.named_fn_stack.push(id.name.to_string());
                }
            }
            AstKind::CallExpression(call) => {
                if let Expression::Identifier(callee) = &call.callee {
                    for enclosing in &self.named_fn_stack {
                        self.calls_within
                            .entry(enclosing.clone())
                            .or_default()
                            .insert(callee.name.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    fn leave_node(&mut self, kind: AstKind<'a>) {
        if is_nesting_kind(&kind) {
            self.depth -= 1;
        }
        if let AstKind::Function(func) = kind {
            if func.id.is_some() {
                self.named_fn_stack.pop();
            }
        }
    }
}
