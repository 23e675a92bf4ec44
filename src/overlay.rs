//! Scope-overlay rewrite for live-preview evaluation.
//!
//! In overlay mode a script's free variables resolve against the host's
//! variable store rather than a lexical environment: reads become
//! `GetVar('name')` calls and writes become `SetVar('name', value)` calls.
//! Locally declared names, capability parameters and safe built-ins keep
//! ordinary resolution. `SetVar` is assumed to return the stored value, which
//! lets compound assignment and update expressions keep their expression
//! value.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ir::{BinOp, Expr, Key, Lit, Stmt, Target, UpdateOp};
use crate::policy;

/// Rewrite a lowered body into its overlay form.
pub fn rewrite(body: Vec<Stmt>) -> Vec<Stmt> {
    let mut rewriter = Rewriter { scopes: vec![] };
    rewriter.block(body)
}

struct Rewriter {
    scopes: Vec<HashSet<String>>,
}

impl Rewriter {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|frame| frame.contains(name))
            || policy::is_capability_identifier(name)
            || policy::is_safe_builtin(name)
            // Error constructors live in the root environment but not in the
            // policy's always-safe table.
            || matches!(name, "Error" | "TypeError" | "RangeError")
    }

    fn get_var(name: &str) -> Expr {
        Expr::Call {
            callee: Box::new(Expr::Ident("GetVar".to_string())),
            args: vec![Expr::Lit(Lit::Str(name.to_string()))],
            optional: false,
        }
    }

    fn set_var(name: &str, value: Expr) -> Expr {
        Expr::Call {
            callee: Box::new(Expr::Ident("SetVar".to_string())),
            args: vec![Expr::Lit(Lit::Str(name.to_string())), value],
            optional: false,
        }
    }

    /// Declarations are hoisted into the frame before any statement is
    /// rewritten, so forward references inside the block stay local.
    fn hoist(stmts: &[Stmt], frame: &mut HashSet<String>) {
        for stmt in stmts {
            match stmt {
                Stmt::VarDecl { name, .. } | Stmt::FuncDecl { name, .. } => {
                    frame.insert(name.clone());
                }
                _ => {}
            }
        }
    }

    fn block(&mut self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let mut frame = HashSet::new();
        Self::hoist(&stmts, &mut frame);
        self.scopes.push(frame);
        let out = stmts.into_iter().map(|s| self.stmt(s)).collect();
        self.scopes.pop();
        out
    }

    fn function_body(&mut self, params: &[String], body: Rc<Vec<Stmt>>) -> Rc<Vec<Stmt>> {
        let mut frame: HashSet<String> = params.iter().cloned().collect();
        let body = Rc::try_unwrap(body).unwrap_or_else(|rc| (*rc).clone());
        Self::hoist(&body, &mut frame);
        self.scopes.push(frame);
        let out: Vec<Stmt> = body.into_iter().map(|s| self.stmt(s)).collect();
        self.scopes.pop();
        Rc::new(out)
    }

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        match stmt {
            Stmt::Expr(e) => Stmt::Expr(self.expr(e)),
            Stmt::VarDecl { kind, name, init } => Stmt::VarDecl {
                kind,
                name,
                init: init.map(|e| self.expr(e)),
            },
            Stmt::FuncDecl { name, params, body } => {
                let body = self.function_body(&params, body);
                Stmt::FuncDecl { name, params, body }
            }
            Stmt::Return(arg) => Stmt::Return(arg.map(|e| self.expr(e))),
            Stmt::Throw(e) => Stmt::Throw(self.expr(e)),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => Stmt::If {
                test: self.expr(test),
                consequent: Box::new(self.stmt(*consequent)),
                alternate: alternate.map(|alt| Box::new(self.stmt(*alt))),
            },
            Stmt::While { test, body } => Stmt::While {
                test: self.expr(test),
                body: Box::new(self.stmt(*body)),
            },
            Stmt::DoWhile { body, test } => Stmt::DoWhile {
                body: Box::new(self.stmt(*body)),
                test: self.expr(test),
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let mut frame = HashSet::new();
                Self::hoist(&init, &mut frame);
                self.scopes.push(frame);
                let init = init.into_iter().map(|s| self.stmt(s)).collect();
                let test = test.map(|e| self.expr(e));
                let update = update.map(|e| self.expr(e));
                let body = Box::new(self.stmt(*body));
                self.scopes.pop();
                Stmt::For {
                    init,
                    test,
                    update,
                    body,
                }
            }
            Stmt::ForIn {
                binding,
                object,
                body,
            } => {
                let object = self.expr(object);
                self.scopes.push([binding.clone()].into_iter().collect());
                let body = Box::new(self.stmt(*body));
                self.scopes.pop();
                Stmt::ForIn {
                    binding,
                    object,
                    body,
                }
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => {
                let iterable = self.expr(iterable);
                self.scopes.push([binding.clone()].into_iter().collect());
                let body = Box::new(self.stmt(*body));
                self.scopes.pop();
                Stmt::ForOf {
                    binding,
                    iterable,
                    body,
                }
            }
            Stmt::Block(body) => Stmt::Block(self.block(body)),
            Stmt::Switch {
                discriminant,
                cases,
            } => Stmt::Switch {
                discriminant: self.expr(discriminant),
                cases: cases
                    .into_iter()
                    .map(|(test, body)| (test.map(|e| self.expr(e)), self.block(body)))
                    .collect(),
            },
            Stmt::Try {
                block,
                catch,
                finally,
            } => Stmt::Try {
                block: self.block(block),
                catch: catch.map(|(param, body)| {
                    let mut frame = HashSet::new();
                    if let Some(param) = &param {
                        frame.insert(param.clone());
                    }
                    Self::hoist(&body, &mut frame);
                    self.scopes.push(frame);
                    let body = body.into_iter().map(|s| self.stmt(s)).collect();
                    self.scopes.pop();
                    (param, body)
                }),
                finally: finally.map(|body| self.block(body)),
            },
            other @ (Stmt::Break | Stmt::Continue | Stmt::Empty) => other,
        }
    }

    fn key(&mut self, key: Key) -> Key {
        match key {
            Key::Static(name) => Key::Static(name),
            Key::Computed(e) => Key::Computed(Box::new(self.expr(*e))),
        }
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Ident(name) => {
                if self.is_bound(&name) {
                    Expr::Ident(name)
                } else {
                    Self::get_var(&name)
                }
            }
            Expr::Assign { op, target, value } => {
                let value = self.expr(*value);
                match *target {
                    Target::Ident(name) if !self.is_bound(&name) => match op {
                        None => Self::set_var(&name, value),
                        Some(op) => Self::set_var(
                            &name,
                            Expr::Binary {
                                op,
                                left: Box::new(Self::get_var(&name)),
                                right: Box::new(value),
                            },
                        ),
                    },
                    target => Expr::Assign {
                        op,
                        target: Box::new(self.target(target)),
                        value: Box::new(value),
                    },
                }
            }
            Expr::Update { op, prefix, target } => match *target {
                Target::Ident(name) if !self.is_bound(&name) => {
                    let delta = match op {
                        UpdateOp::Inc => 1.0,
                        UpdateOp::Dec => -1.0,
                    };
                    let stored = Self::set_var(
                        &name,
                        Expr::Binary {
                            op: BinOp::Add,
                            left: Box::new(Self::get_var(&name)),
                            right: Box::new(Expr::Lit(Lit::Num(delta))),
                        },
                    );
                    if prefix {
                        stored
                    } else {
                        // The stored value is the new one; subtract the delta
                        // back out to recover the pre-update value.
                        Expr::Binary {
                            op: BinOp::Sub,
                            left: Box::new(stored),
                            right: Box::new(Expr::Lit(Lit::Num(delta))),
                        }
                    }
                }
                target => Expr::Update {
                    op,
                    prefix,
                    target: Box::new(self.target(target)),
                },
            },
            Expr::Template { quasis, exprs } => Expr::Template {
                quasis,
                exprs: exprs.into_iter().map(|e| self.expr(e)).collect(),
            },
            Expr::Array(items) => {
                Expr::Array(items.into_iter().map(|e| self.expr(e)).collect())
            }
            Expr::Object(props) => Expr::Object(
                props
                    .into_iter()
                    .map(|(k, v)| (self.key(k), self.expr(v)))
                    .collect(),
            ),
            Expr::Function { name, params, body } => {
                let body = self.function_body(&params, body);
                Expr::Function { name, params, body }
            }
            Expr::Arrow { params, body } => {
                let body = self.function_body(&params, body);
                Expr::Arrow { params, body }
            }
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(self.expr(*operand)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: Box::new(self.expr(*test)),
                consequent: Box::new(self.expr(*consequent)),
                alternate: Box::new(self.expr(*alternate)),
            },
            Expr::Call {
                callee,
                args,
                optional,
            } => Expr::Call {
                callee: Box::new(self.expr(*callee)),
                args: args.into_iter().map(|e| self.expr(e)).collect(),
                optional,
            },
            Expr::New { callee, args } => Expr::New {
                callee: Box::new(self.expr(*callee)),
                args: args.into_iter().map(|e| self.expr(e)).collect(),
            },
            Expr::Member {
                object,
                key,
                optional,
            } => Expr::Member {
                object: Box::new(self.expr(*object)),
                key: self.key(key),
                optional,
            },
            Expr::Await(inner) => Expr::Await(Box::new(self.expr(*inner))),
            Expr::Sequence(exprs) => {
                Expr::Sequence(exprs.into_iter().map(|e| self.expr(e)).collect())
            }
            leaf @ (Expr::Lit(_) | Expr::This) => leaf,
        }
    }

    fn target(&mut self, target: Target) -> Target {
        match target {
            Target::Ident(name) => Target::Ident(name),
            Target::Member { object, key } => Target::Member {
                object: Box::new(self.expr(*object)),
                key: self.key(key),
            },
        }
    }
}
