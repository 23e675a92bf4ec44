//! Static security analysis of script text.
//!
//! A script is parsed once (inside the anonymous-function wrapper) and walked
//! with a lexical scope stack: each function, arrow and catch clause pushes a
//! frame holding its parameters and hoisted declarations, so legitimate local
//! shadowing of a capability-like name is never misreported while a binding in
//! a nested scope never suppresses detection outside it. Every identifier
//! reference, member access, call expression and dynamic import is classified
//! against the security policy. Violations accumulate — callers need the
//! complete list to render actionable diagnostics, so nothing short-circuits.
//!
//! Identifier policy is deliberately asymmetric: forbidden globals are a
//! deny-list, while identifiers that are neither forbidden, capability slots,
//! nor safe built-ins are accepted. The embedding runtime's capability
//! surface evolves faster than any closed allow-list could track; safety is
//! enforced at the boundary instead.

use std::collections::HashSet;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    self, ArrowFunctionExpression, BindingPattern, CallExpression, CatchClause,
    ComputedMemberExpression, Expression, FormalParameters, Function, IdentifierReference,
    ImportExpression, NewExpression, Statement, StaticMemberExpression,
};
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_syntax::scope::ScopeFlags;
use serde::{Deserialize, Serialize};

use crate::parse::{line_excerpt, script_position, script_source_type, unwrap_body, wrap_script};
use crate::policy::{self, ViolationKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub kind: ViolationKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: vec![],
        }
    }

    fn rejected(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Validate a script against the security policy. Produced fresh on every
/// call; verdicts are never cached (only compiled artifacts are).
pub fn validate(script: &str) -> ValidationResult {
    let wrapped = wrap_script(script);
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &wrapped, script_source_type()).parse();

    if !ret.errors.is_empty() {
        let diag = &ret.errors[0];
        let offset = diag
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map(|label| label.offset())
            .unwrap_or(0);
        let (line, column) = script_position(script, offset);
        let excerpt = line_excerpt(script, line);
        return ValidationResult::rejected(vec![ValidationError {
            kind: ViolationKind::Syntax,
            message: format!("{} Near: \"{}\"", diag, excerpt),
            line,
            column,
            offending_identifier: None,
        }]);
    }

    let Some(body) = unwrap_body(&ret.program) else {
        // Parser accepted something that is not wrapper-shaped; treat it the
        // same as a parse failure rather than skipping validation.
        return ValidationResult::rejected(vec![ValidationError {
            kind: ViolationKind::Syntax,
            message: "Script did not parse as a function body.".to_string(),
            line: 1,
            column: 1,
            offending_identifier: None,
        }]);
    };

    // Top-level declarations are hoisted into the root frame before the walk
    // so forward references stay local.
    let mut root = HashSet::new();
    hoist_statements(&body.statements, &mut root);

    let mut walker = PolicyWalker {
        script,
        scopes: vec![root],
        handled: HashSet::new(),
        errors: vec![],
    };
    for stmt in &body.statements {
        walker.visit_statement(stmt);
    }

    if walker.errors.is_empty() {
        ValidationResult::ok()
    } else {
        ValidationResult::rejected(walker.errors)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDING HOISTING
// ═══════════════════════════════════════════════════════════════════════════════

fn hoist_declarators(decl: &ast::VariableDeclaration, frame: &mut HashSet<String>) {
    for declarator in &decl.declarations {
        if let BindingPattern::BindingIdentifier(id) = &declarator.id {
            frame.insert(id.name.to_string());
        }
    }
}

fn hoist_params(params: &FormalParameters, frame: &mut HashSet<String>) {
    for param in &params.items {
        if let BindingPattern::BindingIdentifier(id) = &param.pattern {
            frame.insert(id.name.to_string());
        }
    }
    if let Some(rest) = &params.rest {
        if let BindingPattern::BindingIdentifier(id) = &rest.rest.argument {
            frame.insert(id.name.to_string());
        }
    }
}

fn hoist_statements(stmts: &[Statement], frame: &mut HashSet<String>) {
    for stmt in stmts {
        hoist_statement(stmt, frame);
    }
}

/// Collect the names a statement declares in the enclosing function scope.
/// Nested function and arrow bodies are not descended into; their bindings
/// belong to the frame pushed when the walk enters them.
fn hoist_statement(stmt: &Statement, frame: &mut HashSet<String>) {
    match stmt {
        Statement::VariableDeclaration(decl) => hoist_declarators(decl, frame),
        Statement::FunctionDeclaration(func) => {
            if let Some(id) = &func.id {
                frame.insert(id.name.to_string());
            }
        }
        Statement::ClassDeclaration(class) => {
            if let Some(id) = &class.id {
                frame.insert(id.name.to_string());
            }
        }
        Statement::BlockStatement(block) => hoist_statements(&block.body, frame),
        Statement::IfStatement(if_stmt) => {
            hoist_statement(&if_stmt.consequent, frame);
            if let Some(alt) = &if_stmt.alternate {
                hoist_statement(alt, frame);
            }
        }
        Statement::WhileStatement(s) => hoist_statement(&s.body, frame),
        Statement::DoWhileStatement(s) => hoist_statement(&s.body, frame),
        Statement::ForStatement(s) => {
            if let Some(ast::ForStatementInit::VariableDeclaration(decl)) = &s.init {
                hoist_declarators(decl, frame);
            }
            hoist_statement(&s.body, frame);
        }
        Statement::ForInStatement(s) => {
            if let ast::ForStatementLeft::VariableDeclaration(decl) = &s.left {
                hoist_declarators(decl, frame);
            }
            hoist_statement(&s.body, frame);
        }
        Statement::ForOfStatement(s) => {
            if let ast::ForStatementLeft::VariableDeclaration(decl) = &s.left {
                hoist_declarators(decl, frame);
            }
            hoist_statement(&s.body, frame);
        }
        Statement::SwitchStatement(s) => {
            for case in &s.cases {
                hoist_statements(&case.consequent, frame);
            }
        }
        Statement::TryStatement(s) => {
            hoist_statements(&s.block.body, frame);
            if let Some(handler) = &s.handler {
                hoist_statements(&handler.body.body, frame);
            }
            if let Some(fin) = &s.finalizer {
                hoist_statements(&fin.body, frame);
            }
        }
        Statement::LabeledStatement(s) => hoist_statement(&s.body, frame),
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POLICY CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

struct PolicyWalker<'s> {
    script: &'s str,
    /// Lexical scope stack; a name bound in any live frame shadows the
    /// policy tables at the reference site.
    scopes: Vec<HashSet<String>>,
    /// Span starts of identifiers already reported through a call/new check,
    /// so the reference pass does not report them a second time.
    handled: HashSet<u32>,
    errors: Vec<ValidationError>,
}

impl<'s> PolicyWalker<'s> {
    fn push_error(
        &mut self,
        kind: ViolationKind,
        offset: u32,
        identifier: Option<&str>,
        message: String,
    ) {
        let (line, column) = script_position(self.script, offset as usize);
        self.errors.push(ValidationError {
            kind,
            message,
            line,
            column,
            offending_identifier: identifier.map(|s| s.to_string()),
        });
    }

    fn classify_reference(&mut self, name: &str, offset: u32) {
        if self.handled.contains(&offset) {
            return;
        }
        if self.scopes.iter().any(|frame| frame.contains(name)) {
            // Declared in a scope visible here; shadowing a forbidden or
            // capability name is the script author's business.
            return;
        }
        if policy::is_forbidden_global(name) {
            self.push_error(
                ViolationKind::ForbiddenGlobal,
                offset,
                Some(name),
                policy::describe_violation(ViolationKind::ForbiddenGlobal, Some(name)),
            );
        }
        // Capability identifiers, safe built-ins, and the unknown middle
        // ground are all accepted here.
    }

    fn check_property(&mut self, name: &str, offset: u32) {
        if policy::is_forbidden_property(name) {
            self.push_error(
                ViolationKind::ForbiddenProperty,
                offset,
                Some(name),
                policy::describe_violation(ViolationKind::ForbiddenProperty, Some(name)),
            );
        }
    }
}

/// String literal (or expression-free template literal) — the payload shape
/// of the classic indirect-eval `setTimeout("...")` pattern.
fn is_string_payload(expr: &Expression) -> bool {
    match expr {
        Expression::StringLiteral(_) => true,
        Expression::TemplateLiteral(tpl) => tpl.expressions.is_empty(),
        _ => false,
    }
}

impl<'a, 's> Visit<'a> for PolicyWalker<'s> {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        self.classify_reference(ident.name.as_str(), ident.span.start);
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        let mut frame = HashSet::new();
        // A function expression's name is visible inside its own body.
        if let Some(id) = &func.id {
            frame.insert(id.name.to_string());
        }
        hoist_params(&func.params, &mut frame);
        if let Some(body) = &func.body {
            hoist_statements(&body.statements, &mut frame);
        }
        self.scopes.push(frame);
        walk::walk_function(self, func, flags);
        self.scopes.pop();
    }

    fn visit_arrow_function_expression(&mut self, func: &ArrowFunctionExpression<'a>) {
        let mut frame = HashSet::new();
        hoist_params(&func.params, &mut frame);
        hoist_statements(&func.body.statements, &mut frame);
        self.scopes.push(frame);
        walk::walk_arrow_function_expression(self, func);
        self.scopes.pop();
    }

    fn visit_catch_clause(&mut self, clause: &CatchClause<'a>) {
        let mut frame = HashSet::new();
        if let Some(param) = &clause.param {
            if let BindingPattern::BindingIdentifier(id) = &param.pattern {
                frame.insert(id.name.to_string());
            }
        }
        self.scopes.push(frame);
        walk::walk_catch_clause(self, clause);
        self.scopes.pop();
    }

    fn visit_static_member_expression(&mut self, expr: &StaticMemberExpression<'a>) {
        self.check_property(expr.property.name.as_str(), expr.property.span.start);
        walk::walk_static_member_expression(self, expr);
    }

    fn visit_computed_member_expression(&mut self, expr: &ComputedMemberExpression<'a>) {
        if let Expression::StringLiteral(key) = &expr.expression {
            self.check_property(key.value.as_str(), key.span.start);
        }
        walk::walk_computed_member_expression(self, expr);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee {
            let name = callee.name.as_str();
            if name == "eval" {
                self.push_error(
                    ViolationKind::ForbiddenCall,
                    callee.span.start,
                    Some(name),
                    policy::describe_violation(ViolationKind::ForbiddenCall, Some(name)),
                );
                self.handled.insert(callee.span.start);
            } else if (name == "setTimeout" || name == "setInterval")
                && call
                    .arguments
                    .first()
                    .and_then(|arg| arg.as_expression())
                    .map(is_string_payload)
                    .unwrap_or(false)
            {
                self.push_error(
                    ViolationKind::ForbiddenCall,
                    callee.span.start,
                    Some(name),
                    format!(
                        "Passing a string to {} is an indirect eval and is not allowed.",
                        name
                    ),
                );
            }
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_new_expression(&mut self, expr: &NewExpression<'a>) {
        if let Expression::Identifier(callee) = &expr.callee {
            if callee.name == "Function" {
                self.push_error(
                    ViolationKind::ForbiddenCall,
                    callee.span.start,
                    Some("Function"),
                    "Constructing functions from strings is not allowed in scripts.".to_string(),
                );
                self.handled.insert(callee.span.start);
            }
        }
        walk::walk_new_expression(self, expr);
    }

    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        self.push_error(
            ViolationKind::ForbiddenDynamicImport,
            expr.span.start,
            None,
            policy::describe_violation(ViolationKind::ForbiddenDynamicImport, None),
        );
        walk::walk_import_expression(self, expr);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAVE-PATH FAILURE EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload signalled to the save pathway when a component's script fails the
/// security policy; the save is expected to abort on this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFailure {
    pub component_id: String,
    pub errors: Vec<ValidationError>,
    pub message: String,
}

/// Build the failure event for a rejected result; `None` when the result is
/// valid.
pub fn validation_failure(component_id: &str, result: &ValidationResult) -> Option<ValidationFailure> {
    if result.valid {
        return None;
    }
    let mut message = format!("Script validation failed for component {}:", component_id);
    for err in &result.errors {
        message.push_str(&format!(
            "\n  line {}, column {}: {}",
            err.line, err.column, err.message
        ));
    }
    log::warn!("{}", message);
    Some(ValidationFailure {
        component_id: component_id.to_string(),
        errors: result.errors.clone(),
        message,
    })
}
