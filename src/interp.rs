//! Tree-walking interpreter for compiled script bodies.
//!
//! Scripts run against a root environment of safe built-ins plus whatever
//! capability values the host bound for the invocation. Execution carries a
//! step budget so a hostile or buggy loop cannot hang the host; the budget
//! error is deliberately not catchable from script `try` blocks.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::ir::{BinOp, Expr, Key, Lit, LogicalOp, Stmt, Target, UnaryOp, UpdateOp};
use crate::value::{Closure, Value};

pub const STEP_LIMIT: u64 = 1_000_000;
/// Each script call frame costs a chain of large `eval_stmt`/`eval_expr`
/// frames on the Rust stack, so the limit must trip well before a 2 MiB
/// thread stack runs out.
pub const MAX_CALL_DEPTH: u32 = 64;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("TypeError: {0}")]
    Type(String),
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),
    #[error("RangeError: {0}")]
    Range(String),
    #[error("script exceeded the execution budget of {0} steps")]
    Budget(u64),
    #[error("{0}")]
    Thrown(Value),
}

impl RuntimeError {
    /// The value a `catch` clause binds for this error. Budget exhaustion has
    /// no catch value; it always unwinds to the host.
    fn catch_value(&self) -> Option<Value> {
        let (name, message) = match self {
            RuntimeError::Thrown(v) => return Some(v.clone()),
            RuntimeError::Budget(_) => return None,
            RuntimeError::Type(m) => ("TypeError", m.clone()),
            RuntimeError::Reference(m) => ("ReferenceError", format!("{} is not defined", m)),
            RuntimeError::Range(m) => ("RangeError", m.clone()),
        };
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::string(name));
        map.insert("message".to_string(), Value::string(message));
        Some(Value::object(map))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENTS
// ═══════════════════════════════════════════════════════════════════════════════

pub type Env = Rc<Scope>;

pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Env>,
}

impl Scope {
    pub fn root() -> Env {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn define(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Assign to the nearest scope that already holds `name`. Returns false
    /// when no scope does.
    fn assign(&self, name: &str, value: Value) -> bool {
        if self.vars.borrow().contains_key(name) {
            self.vars.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        match &self.parent {
            Some(p) => p.assign(name, value),
            None => false,
        }
    }

    fn define_at_root(&self, name: &str, value: Value) {
        match &self.parent {
            Some(p) => p.define_at_root(name, value),
            None => self.define(name, value),
        }
    }
}

/// Build a fresh root environment with the safe built-in globals.
pub fn root_env() -> Env {
    let env = Scope::root();
    install_builtins(&env);
    env
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTION
// ═══════════════════════════════════════════════════════════════════════════════

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interp {
    steps: Cell<u64>,
    depth: Cell<u32>,
    max_steps: u64,
}

impl Default for Interp {
    fn default() -> Self {
        Interp {
            steps: Cell::new(0),
            depth: Cell::new(0),
            max_steps: STEP_LIMIT,
        }
    }
}

impl Interp {
    pub fn with_budget(max_steps: u64) -> Self {
        Interp {
            max_steps,
            ..Interp::default()
        }
    }

    /// Execute a script body to completion. The value of a `return` statement
    /// becomes the script's result; falling off the end yields `undefined`.
    pub fn run(&self, body: &[Stmt], env: &Env) -> Result<Value, RuntimeError> {
        match self.eval_stmts(body, env)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Undefined),
        }
    }

    fn tick(&self) -> Result<(), RuntimeError> {
        let n = self.steps.get() + 1;
        self.steps.set(n);
        if n > self.max_steps {
            Err(RuntimeError::Budget(self.max_steps))
        } else {
            Ok(())
        }
    }

    fn eval_stmts(&self, stmts: &[Stmt], env: &Env) -> Result<Flow, RuntimeError> {
        // Function declarations are hoisted to the top of their block.
        for stmt in stmts {
            if let Stmt::FuncDecl { name, params, body } = stmt {
                env.define(
                    name,
                    Value::Function(Rc::new(Closure {
                        name: Some(name.clone()),
                        params: params.clone(),
                        body: Rc::clone(body),
                        env: Rc::clone(env),
                    })),
                );
            }
        }
        for stmt in stmts {
            match self.eval_stmt(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_stmt(&self, stmt: &Stmt, env: &Env) -> Result<Flow, RuntimeError> {
        self.tick()?;
        match stmt {
            Stmt::Empty | Stmt::FuncDecl { .. } => Ok(Flow::Normal),
            Stmt::Expr(e) => {
                self.eval_expr(e, env)?;
                Ok(Flow::Normal)
            }
            Stmt::VarDecl { name, init, .. } => {
                let value = match init {
                    Some(e) => self.eval_expr(e, env)?,
                    None => Value::Undefined,
                };
                env.define(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Return(arg) => {
                let value = match arg {
                    Some(e) => self.eval_expr(e, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(e) => {
                let value = self.eval_expr(e, env)?;
                Err(RuntimeError::Thrown(value))
            }
            Stmt::Block(body) => {
                let scope = Scope::child(env);
                self.eval_stmts(body, &scope)
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval_expr(test, env)?.is_truthy() {
                    self.eval_stmt(consequent, env)
                } else if let Some(alt) = alternate {
                    self.eval_stmt(alt, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval_expr(test, env)?.is_truthy() {
                    match self.eval_stmt(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    match self.eval_stmt(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval_expr(test, env)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = Scope::child(env);
                self.eval_stmts(init, &scope)?;
                loop {
                    if let Some(test) = test {
                        if !self.eval_expr(test, &scope)?.is_truthy() {
                            break;
                        }
                    }
                    match self.eval_stmt(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval_expr(update, &scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForIn {
                binding,
                object,
                body,
            } => {
                let value = self.eval_expr(object, env)?;
                let keys: Vec<String> = match &value {
                    Value::Object(map) => map.borrow().keys().cloned().collect(),
                    Value::Array(items) => {
                        (0..items.borrow().len()).map(|i| i.to_string()).collect()
                    }
                    Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
                    _ => vec![],
                };
                for key in keys {
                    let scope = Scope::child(env);
                    scope.define(binding, Value::string(key));
                    match self.eval_stmt(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => {
                let value = self.eval_expr(iterable, env)?;
                let items: Vec<Value> = match &value {
                    Value::Array(items) => items.borrow().clone(),
                    Value::Str(s) => s.chars().map(|c| Value::string(c.to_string())).collect(),
                    other => {
                        return Err(RuntimeError::Type(format!(
                            "{} is not iterable",
                            other.type_of()
                        )))
                    }
                };
                for item in items {
                    let scope = Scope::child(env);
                    scope.define(binding, item);
                    match self.eval_stmt(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval_expr(discriminant, env)?;
                let scope = Scope::child(env);
                let mut start = None;
                for (i, (test, _)) in cases.iter().enumerate() {
                    if let Some(test) = test {
                        if self.eval_expr(test, &scope)?.strict_eq(&value) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                if start.is_none() {
                    start = cases.iter().position(|(test, _)| test.is_none());
                }
                if let Some(start) = start {
                    'cases: for (_, body) in &cases[start..] {
                        match self.eval_stmts(body, &scope)? {
                            Flow::Break => break 'cases,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Continue => return Ok(Flow::Continue),
                            Flow::Normal => {}
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Try {
                block,
                catch,
                finally,
            } => {
                let mut result = {
                    let scope = Scope::child(env);
                    self.eval_stmts(block, &scope)
                };
                if let Err(err) = &result {
                    if let (Some((param, handler)), Some(caught)) = (catch, err.catch_value()) {
                        let scope = Scope::child(env);
                        if let Some(param) = param {
                            scope.define(param, caught);
                        }
                        result = self.eval_stmts(handler, &scope);
                    }
                }
                if let Some(fin) = finally {
                    let scope = Scope::child(env);
                    match self.eval_stmts(fin, &scope)? {
                        // Control flow out of `finally` overrides the try
                        // outcome, as in JS.
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                result
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn eval_expr(&self, expr: &Expr, env: &Env) -> Result<Value, RuntimeError> {
        self.tick()?;
        match expr {
            Expr::Lit(lit) => Ok(match lit {
                Lit::Null => Value::Null,
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Num(n) => Value::Number(*n),
                Lit::Str(s) => Value::string(s.clone()),
            }),
            Expr::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| RuntimeError::Reference(name.clone())),
            // Scripts have no receiver of their own.
            Expr::This => Ok(Value::Undefined),
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(e) = exprs.get(i) {
                        out.push_str(&self.eval_expr(e, env)?.display_string());
                    }
                }
                Ok(Value::string(out))
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item, env)?);
                }
                Ok(Value::array(out))
            }
            Expr::Object(props) => {
                let mut map = BTreeMap::new();
                for (key, value) in props {
                    let key = self.eval_key(key, env)?;
                    map.insert(key, self.eval_expr(value, env)?);
                }
                Ok(Value::object(map))
            }
            Expr::Function { name, params, body } => Ok(Value::Function(Rc::new(Closure {
                name: name.clone(),
                params: params.clone(),
                body: Rc::clone(body),
                env: Rc::clone(env),
            }))),
            Expr::Arrow { params, body } => Ok(Value::Function(Rc::new(Closure {
                name: None,
                params: params.clone(),
                body: Rc::clone(body),
                env: Rc::clone(env),
            }))),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, env),
            Expr::Update { op, prefix, target } => {
                let old = self.read_target(target, env)?.to_number();
                let delta = match op {
                    UpdateOp::Inc => 1.0,
                    UpdateOp::Dec => -1.0,
                };
                let new = old + delta;
                self.write_target(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let lhs = self.eval_expr(left, env)?;
                let rhs = self.eval_expr(right, env)?;
                self.eval_binary(*op, &lhs, &rhs)
            }
            Expr::Logical { op, left, right } => {
                let lhs = self.eval_expr(left, env)?;
                let take_right = match op {
                    LogicalOp::And => lhs.is_truthy(),
                    LogicalOp::Or => !lhs.is_truthy(),
                    LogicalOp::Nullish => lhs.is_nullish(),
                };
                if take_right {
                    self.eval_expr(right, env)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval_expr(test, env)?.is_truthy() {
                    self.eval_expr(consequent, env)
                } else {
                    self.eval_expr(alternate, env)
                }
            }
            Expr::Assign { op, target, value } => {
                let value = match op {
                    None => self.eval_expr(value, env)?,
                    Some(op) => {
                        let old = self.read_target(target, env)?;
                        let rhs = self.eval_expr(value, env)?;
                        self.eval_binary(*op, &old, &rhs)?
                    }
                };
                self.write_target(target, value.clone(), env)?;
                Ok(value)
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for e in exprs {
                    last = self.eval_expr(e, env)?;
                }
                Ok(last)
            }
            Expr::Member {
                object,
                key,
                optional,
            } => {
                let obj = self.eval_expr(object, env)?;
                if *optional && obj.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.eval_key(key, env)?;
                self.get_member(&obj, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, env),
            Expr::New { callee, args } => {
                let ctor = self.eval_expr(callee, env)?;
                let argv = self.eval_args(args, env)?;
                match self.call_value(&ctor, &argv)? {
                    // A constructor that returns nothing yields a fresh
                    // empty object.
                    Value::Undefined => Ok(Value::object(BTreeMap::new())),
                    other => Ok(other),
                }
            }
            // Capability calls return plain values, not promises, so `await`
            // is a pass-through.
            Expr::Await(inner) => self.eval_expr(inner, env),
        }
    }

    fn eval_key(&self, key: &Key, env: &Env) -> Result<String, RuntimeError> {
        Ok(match key {
            Key::Static(name) => name.clone(),
            Key::Computed(e) => self.eval_expr(e, env)?.display_string(),
        })
    }

    fn eval_args(&self, args: &[Expr], env: &Env) -> Result<Vec<Value>, RuntimeError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval_expr(arg, env)?);
        }
        Ok(out)
    }

    fn eval_unary(&self, op: UnaryOp, operand: &Expr, env: &Env) -> Result<Value, RuntimeError> {
        if op == UnaryOp::TypeOf {
            // `typeof missing` answers "undefined" rather than throwing.
            if let Expr::Ident(name) = operand {
                return Ok(match env.lookup(name) {
                    Some(v) => Value::string(v.type_of()),
                    None => Value::string("undefined"),
                });
            }
        }
        if op == UnaryOp::Delete {
            if let Expr::Member { object, key, .. } = operand {
                let obj = self.eval_expr(object, env)?;
                let key = self.eval_key(key, env)?;
                match &obj {
                    Value::Object(map) => {
                        map.borrow_mut().remove(&key);
                    }
                    Value::Array(items) => {
                        if let Ok(idx) = key.parse::<usize>() {
                            let mut items = items.borrow_mut();
                            if idx < items.len() {
                                items[idx] = Value::Undefined;
                            }
                        }
                    }
                    _ => {}
                }
                return Ok(Value::Bool(true));
            }
            self.eval_expr(operand, env)?;
            return Ok(Value::Bool(true));
        }

        let value = self.eval_expr(operand, env)?;
        Ok(match op {
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::BitNot => Value::Number(f64::from(!to_int32(value.to_number()))),
            UnaryOp::TypeOf => Value::string(value.type_of()),
            UnaryOp::Void => Value::Undefined,
            UnaryOp::Delete => Value::Bool(true),
        })
    }

    fn eval_binary(&self, op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
        use BinOp::*;
        Ok(match op {
            Add => match (lhs, rhs) {
                (Value::Str(_), _)
                | (_, Value::Str(_))
                | (Value::Array(_) | Value::Object(_), _)
                | (_, Value::Array(_) | Value::Object(_)) => {
                    Value::string(format!("{}{}", lhs.display_string(), rhs.display_string()))
                }
                _ => Value::Number(lhs.to_number() + rhs.to_number()),
            },
            Sub => Value::Number(lhs.to_number() - rhs.to_number()),
            Mul => Value::Number(lhs.to_number() * rhs.to_number()),
            Div => Value::Number(lhs.to_number() / rhs.to_number()),
            Rem => Value::Number(lhs.to_number() % rhs.to_number()),
            Pow => Value::Number(lhs.to_number().powf(rhs.to_number())),
            Eq => Value::Bool(lhs.loose_eq(rhs)),
            Ne => Value::Bool(!lhs.loose_eq(rhs)),
            StrictEq => Value::Bool(lhs.strict_eq(rhs)),
            StrictNe => Value::Bool(!lhs.strict_eq(rhs)),
            Lt | Le | Gt | Ge => {
                let result = match (lhs, rhs) {
                    (Value::Str(a), Value::Str(b)) => match op {
                        Lt => a < b,
                        Le => a <= b,
                        Gt => a > b,
                        _ => a >= b,
                    },
                    _ => {
                        let (a, b) = (lhs.to_number(), rhs.to_number());
                        match op {
                            Lt => a < b,
                            Le => a <= b,
                            Gt => a > b,
                            _ => a >= b,
                        }
                    }
                };
                Value::Bool(result)
            }
            Shl => Value::Number(f64::from(to_int32(lhs.to_number()) << shift_count(rhs))),
            Shr => Value::Number(f64::from(to_int32(lhs.to_number()) >> shift_count(rhs))),
            UShr => Value::Number(f64::from(to_uint32(lhs.to_number()) >> shift_count(rhs))),
            BitAnd => Value::Number(f64::from(
                to_int32(lhs.to_number()) & to_int32(rhs.to_number()),
            )),
            BitOr => Value::Number(f64::from(
                to_int32(lhs.to_number()) | to_int32(rhs.to_number()),
            )),
            BitXor => Value::Number(f64::from(
                to_int32(lhs.to_number()) ^ to_int32(rhs.to_number()),
            )),
            In => match rhs {
                Value::Object(map) => {
                    Value::Bool(map.borrow().contains_key(&lhs.display_string()))
                }
                Value::Array(items) => {
                    let len = items.borrow().len();
                    Value::Bool(matches!(
                        lhs.display_string().parse::<usize>(),
                        Ok(idx) if idx < len
                    ))
                }
                other => {
                    return Err(RuntimeError::Type(format!(
                        "cannot use 'in' on {}",
                        other.type_of()
                    )))
                }
            },
            InstanceOf => {
                return Err(RuntimeError::Type(
                    "instanceof is not supported in scripts".to_string(),
                ))
            }
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Targets and members
    // ───────────────────────────────────────────────────────────────────────────

    fn read_target(&self, target: &Target, env: &Env) -> Result<Value, RuntimeError> {
        match target {
            Target::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| RuntimeError::Reference(name.clone())),
            Target::Member { object, key } => {
                let obj = self.eval_expr(object, env)?;
                let key = self.eval_key(key, env)?;
                self.get_member(&obj, &key)
            }
        }
    }

    fn write_target(&self, target: &Target, value: Value, env: &Env) -> Result<(), RuntimeError> {
        match target {
            Target::Ident(name) => {
                // Undeclared assignment lands in the script's outermost
                // scope, mirroring sloppy-mode globals.
                if !env.assign(name, value.clone()) {
                    env.define_at_root(name, value);
                }
                Ok(())
            }
            Target::Member { object, key } => {
                let obj = self.eval_expr(object, env)?;
                let key = self.eval_key(key, env)?;
                self.set_member(&obj, &key, value)
            }
        }
    }

    fn get_member(&self, obj: &Value, key: &str) -> Result<Value, RuntimeError> {
        match obj {
            Value::Undefined | Value::Null => Err(RuntimeError::Type(format!(
                "cannot read property '{}' of {}",
                key,
                obj.display_string()
            ))),
            Value::Str(s) => Ok(match key {
                "length" => Value::Number(s.chars().count() as f64),
                _ => match key.parse::<usize>() {
                    Ok(idx) => s
                        .chars()
                        .nth(idx)
                        .map(|c| Value::string(c.to_string()))
                        .unwrap_or(Value::Undefined),
                    Err(_) => Value::Undefined,
                },
            }),
            Value::Array(items) => Ok(match key {
                "length" => Value::Number(items.borrow().len() as f64),
                _ => match key.parse::<usize>() {
                    Ok(idx) => items.borrow().get(idx).cloned().unwrap_or(Value::Undefined),
                    Err(_) => Value::Undefined,
                },
            }),
            Value::Object(map) => Ok(map.borrow().get(key).cloned().unwrap_or(Value::Undefined)),
            Value::Function(_) | Value::Native(_) | Value::Number(_) | Value::Bool(_) => {
                Ok(Value::Undefined)
            }
        }
    }

    fn set_member(&self, obj: &Value, key: &str, value: Value) -> Result<(), RuntimeError> {
        match obj {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                if key == "length" {
                    let len = value.to_number();
                    if len.is_finite() && len >= 0.0 {
                        items.borrow_mut().resize(len as usize, Value::Undefined);
                    }
                    return Ok(());
                }
                match key.parse::<usize>() {
                    Ok(idx) => {
                        let mut items = items.borrow_mut();
                        if idx >= items.len() {
                            items.resize(idx + 1, Value::Undefined);
                        }
                        items[idx] = value;
                        Ok(())
                    }
                    // Arrays silently ignore non-index property writes.
                    Err(_) => Ok(()),
                }
            }
            other => Err(RuntimeError::Type(format!(
                "cannot set property '{}' on {}",
                key,
                other.type_of()
            ))),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Calls
    // ───────────────────────────────────────────────────────────────────────────

    fn eval_call(
        &self,
        callee: &Expr,
        args: &[Expr],
        optional: bool,
        env: &Env,
    ) -> Result<Value, RuntimeError> {
        if let Expr::Member {
            object,
            key,
            optional: member_optional,
        } = callee
        {
            let obj = self.eval_expr(object, env)?;
            if (*member_optional || optional) && obj.is_nullish() {
                return Ok(Value::Undefined);
            }
            let key = self.eval_key(key, env)?;
            let argv = self.eval_args(args, env)?;
            return self.call_method(&obj, &key, &argv);
        }

        let f = self.eval_expr(callee, env)?;
        if optional && f.is_nullish() {
            return Ok(Value::Undefined);
        }
        let argv = self.eval_args(args, env)?;
        self.call_value(&f, &argv)
    }

    /// Call any callable value.
    pub fn call_value(&self, f: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        match f {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Native(native) => (native.func)(args),
            other => Err(RuntimeError::Type(format!(
                "{} is not a function",
                other.display_string()
            ))),
        }
    }

    pub fn call_closure(&self, closure: &Closure, args: &[Value]) -> Result<Value, RuntimeError> {
        let depth = self.depth.get() + 1;
        if depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::Range(
                "maximum call depth exceeded".to_string(),
            ));
        }
        self.depth.set(depth);

        let scope = Scope::child(&closure.env);
        if let Some(name) = &closure.name {
            // Recursion through the function's own name works even when the
            // declaration binding was shadowed.
            if scope.lookup(name).is_none() {
                scope.define(
                    name,
                    Value::Function(Rc::new(Closure {
                        name: closure.name.clone(),
                        params: closure.params.clone(),
                        body: Rc::clone(&closure.body),
                        env: Rc::clone(&closure.env),
                    })),
                );
            }
        }
        for (i, param) in closure.params.iter().enumerate() {
            scope.define(param, args.get(i).cloned().unwrap_or(Value::Undefined));
        }

        let result = self.run(&closure.body, &scope);
        self.depth.set(self.depth.get() - 1);
        result
    }

    fn call_method(&self, obj: &Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        match obj {
            Value::Str(s) => self.string_method(s, name, args),
            Value::Array(items) => self.array_method(obj, items, name, args),
            Value::Number(n) => number_method(*n, name, args),
            Value::Object(map) => {
                let member = map.borrow().get(name).cloned();
                match member {
                    Some(f @ (Value::Function(_) | Value::Native(_))) => self.call_value(&f, args),
                    _ => match name {
                        "hasOwnProperty" => {
                            let key = args
                                .first()
                                .map(Value::display_string)
                                .unwrap_or_default();
                            Ok(Value::Bool(map.borrow().contains_key(&key)))
                        }
                        "toString" => Ok(Value::string(obj.display_string())),
                        _ => Err(RuntimeError::Type(format!("{} is not a function", name))),
                    },
                }
            }
            Value::Function(_) | Value::Native(_) if name == "call" => {
                // `f.call(thisArg, ...)`; the receiver is discarded.
                self.call_value(obj, args.get(1..).unwrap_or(&[]))
            }
            Value::Bool(b) if name == "toString" => Ok(Value::string(b.to_string())),
            other => Err(RuntimeError::Type(format!(
                "{}.{} is not a function",
                other.type_of(),
                name
            ))),
        }
    }

    fn string_method(&self, s: &Rc<str>, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let arg_str = |i: usize| args.get(i).map(Value::display_string).unwrap_or_default();
        let arg_num = |i: usize| args.get(i).map(Value::to_number);
        let chars: Vec<char> = s.chars().collect();

        Ok(match name {
            "toUpperCase" => Value::string(s.to_uppercase()),
            "toLowerCase" => Value::string(s.to_lowercase()),
            "trim" => Value::string(s.trim()),
            "trimStart" => Value::string(s.trim_start()),
            "trimEnd" => Value::string(s.trim_end()),
            "includes" => Value::Bool(s.contains(&arg_str(0))),
            "startsWith" => Value::Bool(s.starts_with(&arg_str(0))),
            "endsWith" => Value::Bool(s.ends_with(&arg_str(0))),
            "indexOf" => {
                let needle = arg_str(0);
                match s.find(&needle) {
                    Some(byte_idx) => Value::Number(s[..byte_idx].chars().count() as f64),
                    None => Value::Number(-1.0),
                }
            }
            "lastIndexOf" => {
                let needle = arg_str(0);
                match s.rfind(&needle) {
                    Some(byte_idx) => Value::Number(s[..byte_idx].chars().count() as f64),
                    None => Value::Number(-1.0),
                }
            }
            "charAt" => {
                let idx = arg_num(0).unwrap_or(0.0);
                if idx >= 0.0 && (idx as usize) < chars.len() {
                    Value::string(chars[idx as usize].to_string())
                } else {
                    Value::string("")
                }
            }
            "at" => {
                let idx = resolve_index(arg_num(0).unwrap_or(0.0), chars.len());
                match idx.and_then(|i| chars.get(i)) {
                    Some(c) => Value::string(c.to_string()),
                    None => Value::Undefined,
                }
            }
            "slice" => {
                let (start, end) = slice_bounds(arg_num(0), arg_num(1), chars.len());
                Value::string(chars[start..end].iter().collect::<String>())
            }
            "substring" => {
                let len = chars.len();
                let clamp = |n: f64| (n.max(0.0) as usize).min(len);
                let mut a = clamp(arg_num(0).unwrap_or(0.0));
                let mut b = clamp(arg_num(1).unwrap_or(len as f64));
                if a > b {
                    std::mem::swap(&mut a, &mut b);
                }
                Value::string(chars[a..b].iter().collect::<String>())
            }
            "split" => match args.first() {
                None | Some(Value::Undefined) => Value::array(vec![Value::Str(Rc::clone(s))]),
                Some(sep) => {
                    let sep = sep.display_string();
                    let parts: Vec<Value> = if sep.is_empty() {
                        chars.iter().map(|c| Value::string(c.to_string())).collect()
                    } else {
                        s.split(&sep as &str).map(Value::string).collect()
                    };
                    Value::array(parts)
                }
            },
            "replace" => Value::string(s.replacen(&arg_str(0), &arg_str(1), 1)),
            "replaceAll" => Value::string(s.replace(&arg_str(0), &arg_str(1))),
            "repeat" => {
                let n = arg_num(0).unwrap_or(0.0);
                if !n.is_finite() || n < 0.0 {
                    return Err(RuntimeError::Range("invalid repeat count".to_string()));
                }
                Value::string(s.repeat(n as usize))
            }
            "padStart" | "padEnd" => {
                let width = arg_num(0).unwrap_or(0.0).max(0.0) as usize;
                let pad = match args.get(1) {
                    None | Some(Value::Undefined) => " ".to_string(),
                    Some(v) => v.display_string(),
                };
                Value::string(pad_string(s, width, &pad, name == "padStart", chars.len()))
            }
            "concat" => {
                let mut out = s.to_string();
                for arg in args {
                    out.push_str(&arg.display_string());
                }
                Value::string(out)
            }
            "charCodeAt" => {
                let idx = arg_num(0).unwrap_or(0.0);
                if idx >= 0.0 && (idx as usize) < chars.len() {
                    Value::Number(chars[idx as usize] as u32 as f64)
                } else {
                    Value::Number(f64::NAN)
                }
            }
            "toString" => Value::Str(Rc::clone(s)),
            _ => {
                return Err(RuntimeError::Type(format!(
                    "string.{} is not a function",
                    name
                )))
            }
        })
    }

    fn array_method(
        &self,
        arr: &Value,
        items: &Rc<RefCell<Vec<Value>>>,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let callback = || {
            args.first().cloned().ok_or_else(|| {
                RuntimeError::Type(format!("Array.prototype.{} needs a callback", name))
            })
        };

        match name {
            "push" => {
                items.borrow_mut().extend(args.iter().cloned());
                Ok(Value::Number(items.borrow().len() as f64))
            }
            "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Ok(Value::Undefined)
                } else {
                    Ok(items.remove(0))
                }
            }
            "unshift" => {
                let mut borrowed = items.borrow_mut();
                for (i, arg) in args.iter().enumerate() {
                    borrowed.insert(i, arg.clone());
                }
                Ok(Value::Number(borrowed.len() as f64))
            }
            "includes" => {
                let target = args.first().cloned().unwrap_or(Value::Undefined);
                Ok(Value::Bool(
                    items.borrow().iter().any(|v| v.strict_eq(&target)),
                ))
            }
            "indexOf" => {
                let target = args.first().cloned().unwrap_or(Value::Undefined);
                Ok(Value::Number(
                    items
                        .borrow()
                        .iter()
                        .position(|v| v.strict_eq(&target))
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                ))
            }
            "join" => {
                let sep = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(v) => v.display_string(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.display_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&sep);
                Ok(Value::string(joined))
            }
            "slice" => {
                let len = items.borrow().len();
                let (start, end) = slice_bounds(
                    args.first().map(Value::to_number),
                    args.get(1).map(Value::to_number),
                    len,
                );
                Ok(Value::array(items.borrow()[start..end].to_vec()))
            }
            "concat" => {
                let mut out = items.borrow().clone();
                for arg in args {
                    match arg {
                        Value::Array(more) => out.extend(more.borrow().iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                Ok(Value::array(out))
            }
            "reverse" => {
                items.borrow_mut().reverse();
                Ok(arr.clone())
            }
            "flat" => {
                let mut out = vec![];
                for item in items.borrow().iter() {
                    match item {
                        Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                Ok(Value::array(out))
            }
            "at" => {
                let idx = args.first().map(Value::to_number).unwrap_or(0.0);
                let borrowed = items.borrow();
                Ok(resolve_index(idx, borrowed.len())
                    .and_then(|i| borrowed.get(i).cloned())
                    .unwrap_or(Value::Undefined))
            }
            "map" => {
                let f = callback()?;
                let snapshot = items.borrow().clone();
                let mut out = Vec::with_capacity(snapshot.len());
                for (i, item) in snapshot.into_iter().enumerate() {
                    out.push(self.call_value(
                        &f,
                        &[item, Value::Number(i as f64), arr.clone()],
                    )?);
                }
                Ok(Value::array(out))
            }
            "filter" => {
                let f = callback()?;
                let snapshot = items.borrow().clone();
                let mut out = vec![];
                for (i, item) in snapshot.into_iter().enumerate() {
                    let keep = self
                        .call_value(&f, &[item.clone(), Value::Number(i as f64), arr.clone()])?
                        .is_truthy();
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::array(out))
            }
            "forEach" => {
                let f = callback()?;
                let snapshot = items.borrow().clone();
                for (i, item) in snapshot.into_iter().enumerate() {
                    self.call_value(&f, &[item, Value::Number(i as f64), arr.clone()])?;
                }
                Ok(Value::Undefined)
            }
            "find" | "findIndex" => {
                let f = callback()?;
                let snapshot = items.borrow().clone();
                for (i, item) in snapshot.into_iter().enumerate() {
                    let hit = self
                        .call_value(&f, &[item.clone(), Value::Number(i as f64), arr.clone()])?
                        .is_truthy();
                    if hit {
                        return Ok(if name == "find" {
                            item
                        } else {
                            Value::Number(i as f64)
                        });
                    }
                }
                Ok(if name == "find" {
                    Value::Undefined
                } else {
                    Value::Number(-1.0)
                })
            }
            "some" | "every" => {
                let f = callback()?;
                let snapshot = items.borrow().clone();
                for (i, item) in snapshot.into_iter().enumerate() {
                    let hit = self
                        .call_value(&f, &[item, Value::Number(i as f64), arr.clone()])?
                        .is_truthy();
                    if name == "some" && hit {
                        return Ok(Value::Bool(true));
                    }
                    if name == "every" && !hit {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(name == "every"))
            }
            "reduce" => {
                let f = callback()?;
                let snapshot = items.borrow().clone();
                let mut iter = snapshot.into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(RuntimeError::Type(
                                "reduce of empty array with no initial value".to_string(),
                            ))
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self.call_value(
                        &f,
                        &[acc, item, Value::Number(i as f64), arr.clone()],
                    )?;
                }
                Ok(acc)
            }
            "sort" => {
                let comparator = args.first().cloned();
                let mut snapshot = items.borrow().clone();
                let mut failure = None;
                snapshot.sort_by(|a, b| {
                    if failure.is_some() {
                        return std::cmp::Ordering::Equal;
                    }
                    match &comparator {
                        Some(f @ (Value::Function(_) | Value::Native(_))) => {
                            match self.call_value(f, &[a.clone(), b.clone()]) {
                                Ok(v) => {
                                    let n = v.to_number();
                                    if n < 0.0 {
                                        std::cmp::Ordering::Less
                                    } else if n > 0.0 {
                                        std::cmp::Ordering::Greater
                                    } else {
                                        std::cmp::Ordering::Equal
                                    }
                                }
                                Err(e) => {
                                    failure = Some(e);
                                    std::cmp::Ordering::Equal
                                }
                            }
                        }
                        _ => a.display_string().cmp(&b.display_string()),
                    }
                });
                if let Some(err) = failure {
                    return Err(err);
                }
                *items.borrow_mut() = snapshot;
                Ok(arr.clone())
            }
            "toString" => Ok(Value::string(arr.display_string())),
            _ => Err(RuntimeError::Type(format!(
                "array.{} is not a function",
                name
            ))),
        }
    }
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    match name {
        "toFixed" => {
            let digits = args.first().map(Value::to_number).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(RuntimeError::Range("toFixed digits out of range".to_string()));
            }
            Ok(Value::string(format!("{:.*}", digits as usize, n)))
        }
        "toString" => Ok(Value::string(Value::Number(n).display_string())),
        _ => Err(RuntimeError::Type(format!(
            "number.{} is not a function",
            name
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NUMERIC HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn to_int32(n: f64) -> i32 {
    if n.is_nan() || n.is_infinite() {
        0
    } else {
        (n as i64) as i32
    }
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

fn shift_count(v: &Value) -> u32 {
    to_uint32(v.to_number()) & 31
}

/// Resolve a possibly-negative `.at()` index against a length.
fn resolve_index(idx: f64, len: usize) -> Option<usize> {
    if idx.is_nan() {
        return Some(0);
    }
    let idx = idx.trunc();
    if idx >= 0.0 {
        Some(idx as usize)
    } else {
        let from_end = (-idx) as usize;
        len.checked_sub(from_end)
    }
}

/// `slice`-style start/end clamping with negative-index support.
fn slice_bounds(start: Option<f64>, end: Option<f64>, len: usize) -> (usize, usize) {
    let clamp = |n: f64| -> usize {
        if n.is_nan() {
            return 0;
        }
        if n < 0.0 {
            len.saturating_sub((-n) as usize)
        } else {
            (n as usize).min(len)
        }
    };
    let start = start.map(clamp).unwrap_or(0);
    let end = end.map(clamp).unwrap_or(len);
    (start, end.max(start))
}

fn pad_string(s: &str, width: usize, pad: &str, at_start: bool, char_len: usize) -> String {
    if char_len >= width || pad.is_empty() {
        return s.to_string();
    }
    let mut padding = String::new();
    while padding.chars().count() < width - char_len {
        padding.push_str(pad);
    }
    let padding: String = padding.chars().take(width - char_len).collect();
    if at_start {
        format!("{}{}", padding, s)
    } else {
        format!("{}{}", s, padding)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-INS
// ═══════════════════════════════════════════════════════════════════════════════

fn install_builtins(env: &Env) {
    env.define("undefined", Value::Undefined);
    env.define("NaN", Value::Number(f64::NAN));
    env.define("Infinity", Value::Number(f64::INFINITY));

    env.define("Math", math_object());
    env.define("JSON", json_object());
    env.define("Date", date_object());
    env.define("Object", object_namespace());
    env.define("Array", array_namespace());

    env.define(
        "String",
        Value::native("String", |args| {
            Ok(match args.first() {
                None => Value::string(""),
                Some(v) => Value::string(v.display_string()),
            })
        }),
    );
    env.define(
        "Number",
        Value::native("Number", |args| {
            Ok(Value::Number(
                args.first().map(Value::to_number).unwrap_or(0.0),
            ))
        }),
    );
    env.define(
        "Boolean",
        Value::native("Boolean", |args| {
            Ok(Value::Bool(args.first().map(Value::is_truthy).unwrap_or(false)))
        }),
    );

    env.define(
        "parseInt",
        Value::native("parseInt", |args| {
            let text = args.first().map(Value::display_string).unwrap_or_default();
            let radix = match args.get(1).map(Value::to_number) {
                Some(r) if r.is_finite() && r != 0.0 => r as u32,
                _ => 10,
            };
            Ok(Value::Number(parse_int(&text, radix)))
        }),
    );
    env.define(
        "parseFloat",
        Value::native("parseFloat", |args| {
            let text = args.first().map(Value::display_string).unwrap_or_default();
            Ok(Value::Number(parse_float(&text)))
        }),
    );
    env.define(
        "isNaN",
        Value::native("isNaN", |args| {
            Ok(Value::Bool(
                args.first().map(Value::to_number).unwrap_or(f64::NAN).is_nan(),
            ))
        }),
    );
    env.define(
        "isFinite",
        Value::native("isFinite", |args| {
            Ok(Value::Bool(
                args.first()
                    .map(Value::to_number)
                    .unwrap_or(f64::NAN)
                    .is_finite(),
            ))
        }),
    );

    env.define(
        "encodeURIComponent",
        Value::native("encodeURIComponent", |args| {
            let text = args.first().map(Value::display_string).unwrap_or_default();
            Ok(Value::string(percent_encode(&text, false)))
        }),
    );
    env.define(
        "encodeURI",
        Value::native("encodeURI", |args| {
            let text = args.first().map(Value::display_string).unwrap_or_default();
            Ok(Value::string(percent_encode(&text, true)))
        }),
    );
    env.define(
        "decodeURIComponent",
        Value::native("decodeURIComponent", percent_decode_native),
    );
    env.define("decodeURI", Value::native("decodeURI", percent_decode_native));

    for ctor in ["Error", "TypeError", "RangeError"] {
        env.define(
            ctor,
            Value::native(ctor, move |args| {
                let mut map = BTreeMap::new();
                map.insert("name".to_string(), Value::string(ctor));
                map.insert(
                    "message".to_string(),
                    Value::string(args.first().map(Value::display_string).unwrap_or_default()),
                );
                Ok(Value::object(map))
            }),
        );
    }
}

fn math_object() -> Value {
    let mut map = BTreeMap::new();
    map.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    map.insert("E".to_string(), Value::Number(std::f64::consts::E));

    let unary = |name: &str, f: fn(f64) -> f64| {
        Value::native(name, move |args| {
            Ok(Value::Number(f(args
                .first()
                .map(Value::to_number)
                .unwrap_or(f64::NAN))))
        })
    };
    map.insert("abs".to_string(), unary("abs", f64::abs));
    map.insert("floor".to_string(), unary("floor", f64::floor));
    map.insert("ceil".to_string(), unary("ceil", f64::ceil));
    map.insert("round".to_string(), unary("round", f64::round));
    map.insert("trunc".to_string(), unary("trunc", f64::trunc));
    map.insert("sqrt".to_string(), unary("sqrt", f64::sqrt));
    map.insert("sign".to_string(), unary("sign", |n| {
        if n.is_nan() || n == 0.0 {
            n
        } else {
            n.signum()
        }
    }));
    map.insert("log".to_string(), unary("log", f64::ln));
    map.insert("exp".to_string(), unary("exp", f64::exp));

    map.insert(
        "pow".to_string(),
        Value::native("pow", |args| {
            let base = args.first().map(Value::to_number).unwrap_or(f64::NAN);
            let exp = args.get(1).map(Value::to_number).unwrap_or(f64::NAN);
            Ok(Value::Number(base.powf(exp)))
        }),
    );
    map.insert(
        "min".to_string(),
        Value::native("min", |args| {
            Ok(Value::Number(
                args.iter()
                    .map(Value::to_number)
                    .fold(f64::INFINITY, f64::min),
            ))
        }),
    );
    map.insert(
        "max".to_string(),
        Value::native("max", |args| {
            Ok(Value::Number(
                args.iter()
                    .map(Value::to_number)
                    .fold(f64::NEG_INFINITY, f64::max),
            ))
        }),
    );
    map.insert(
        "random".to_string(),
        Value::native("random", |_args| Ok(Value::Number(pseudo_random()))),
    );
    Value::object(map)
}

fn json_object() -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "parse".to_string(),
        Value::native("parse", |args| {
            let text = args.first().map(Value::display_string).unwrap_or_default();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(Value::from)
                .map_err(|e| RuntimeError::Thrown(Value::string(format!("JSON.parse: {}", e))))
        }),
    );
    map.insert(
        "stringify".to_string(),
        Value::native("stringify", |args| {
            let value = match args.first() {
                None | Some(Value::Undefined) => return Ok(Value::Undefined),
                Some(v) => v.to_json(),
            };
            // The third argument selects pretty printing; the replacer is
            // not supported.
            let pretty = args
                .get(2)
                .map(|v| v.to_number() > 0.0 || v.as_str().is_some_and(|s| !s.is_empty()))
                .unwrap_or(false);
            let text = if pretty {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            };
            text.map(Value::string)
                .map_err(|e| RuntimeError::Type(format!("JSON.stringify: {}", e)))
        }),
    );
    Value::object(map)
}

fn date_object() -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "now".to_string(),
        Value::native("now", |_args| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as f64)
                .unwrap_or(0.0);
            Ok(Value::Number(millis))
        }),
    );
    Value::object(map)
}

fn object_namespace() -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "keys".to_string(),
        Value::native("keys", |args| {
            Ok(Value::array(match args.first() {
                Some(Value::Object(m)) => m.borrow().keys().map(Value::string).collect(),
                Some(Value::Array(items)) => (0..items.borrow().len())
                    .map(|i| Value::string(i.to_string()))
                    .collect(),
                _ => vec![],
            }))
        }),
    );
    map.insert(
        "values".to_string(),
        Value::native("values", |args| {
            Ok(Value::array(match args.first() {
                Some(Value::Object(m)) => m.borrow().values().cloned().collect(),
                Some(Value::Array(items)) => items.borrow().clone(),
                _ => vec![],
            }))
        }),
    );
    map.insert(
        "entries".to_string(),
        Value::native("entries", |args| {
            Ok(Value::array(match args.first() {
                Some(Value::Object(m)) => m
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::array(vec![Value::string(k.clone()), v.clone()]))
                    .collect(),
                Some(Value::Array(items)) => items
                    .borrow()
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        Value::array(vec![Value::string(i.to_string()), v.clone()])
                    })
                    .collect(),
                _ => vec![],
            }))
        }),
    );
    map.insert(
        "assign".to_string(),
        Value::native("assign", |args| {
            let Some(target @ Value::Object(map)) = args.first() else {
                return Err(RuntimeError::Type(
                    "Object.assign target must be an object".to_string(),
                ));
            };
            for source in &args[1..] {
                if let Value::Object(src) = source {
                    let entries: Vec<_> = src
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    map.borrow_mut().extend(entries);
                }
            }
            Ok(target.clone())
        }),
    );
    Value::object(map)
}

fn array_namespace() -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "isArray".to_string(),
        Value::native("isArray", |args| {
            Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_)))))
        }),
    );
    map.insert(
        "from".to_string(),
        Value::native("from", |args| {
            Ok(match args.first() {
                Some(Value::Array(items)) => Value::array(items.borrow().clone()),
                Some(Value::Str(s)) => {
                    Value::array(s.chars().map(|c| Value::string(c.to_string())).collect())
                }
                _ => Value::array(vec![]),
            })
        }),
    );
    Value::object(map)
}

fn parse_int(text: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut rest = text.trim();
    let mut sign = 1.0;
    if let Some(stripped) = rest.strip_prefix('-') {
        sign = -1.0;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    }
    let mut rest = rest;
    if radix == 16 {
        rest = rest
            .strip_prefix("0x")
            .or_else(|| rest.strip_prefix("0X"))
            .unwrap_or(rest);
    }
    let digits: String = rest
        .chars()
        .take_while(|c| c.to_digit(radix).is_some())
        .collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut out = 0.0f64;
    for c in digits.chars() {
        // Unwrap-free by construction of `digits`.
        out = out * f64::from(radix) + f64::from(c.to_digit(radix).unwrap_or(0));
    }
    sign * out
}

fn parse_float(text: &str) -> f64 {
    let rest = text.trim();
    let mut end = 0;
    let bytes = rest.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let b = bytes[end];
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => {
                seen_exp = true;
                if end + 1 < bytes.len() && (bytes[end + 1] == b'-' || bytes[end + 1] == b'+') {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        if rest.starts_with("Infinity") || rest.starts_with("+Infinity") {
            return f64::INFINITY;
        }
        if rest.starts_with("-Infinity") {
            return f64::NEG_INFINITY;
        }
        return f64::NAN;
    }
    rest[..end].parse::<f64>().unwrap_or(f64::NAN)
}

fn is_uri_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

fn percent_encode(text: &str, keep_uri_structure: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        let keep = is_uri_unreserved(b)
            || (keep_uri_structure
                && matches!(
                    b,
                    b';' | b'/' | b'?' | b':' | b'@' | b'&' | b'=' | b'+' | b'$' | b',' | b'#'
                ));
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn percent_decode_native(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = args.first().map(Value::display_string).unwrap_or_default();
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    return Err(RuntimeError::Type("malformed URI sequence".to_string()));
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map(Value::string)
        .map_err(|_| RuntimeError::Type("malformed URI sequence".to_string()))
}

/// Not cryptographic; scripts only need an ordinary `Math.random`.
fn pseudo_random() -> f64 {
    thread_local! {
        static STATE: Cell<u64> = Cell::new(0);
    }
    STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            x = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9E37_79B9_7F4A_7C15)
                | 1;
        }
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x >> 11) as f64 / (1u64 << 53) as f64
    })
}
