//! Owned intermediate representation for accepted scripts.
//!
//! The oxc AST is arena-allocated and borrows the source text, so compiled
//! units cannot hold it. Lowering produces this self-contained tree instead;
//! the interpreter walks it and the scope-overlay pass rewrites it.

use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Inc,
    Dec,
}

/// Property key in member access and object literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Static(String),
    Computed(Box<Expr>),
}

/// Assignment target. Destructuring patterns never reach the IR; lowering
/// rejects them.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Ident(String),
    Member { object: Box<Expr>, key: Key },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Lit),
    Ident(String),
    This,
    Template {
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(Key, Expr)>),
    Function {
        name: Option<String>,
        params: Vec<String>,
        body: Rc<Vec<Stmt>>,
    },
    Arrow {
        params: Vec<String>,
        body: Rc<Vec<Stmt>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Target>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    /// `op` carries the binary operator of a compound assignment (`+=` etc.);
    /// plain `=` is `None`.
    Assign {
        op: Option<BinOp>,
        target: Box<Target>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        key: Key,
        optional: bool,
    },
    Await(Box<Expr>),
    Sequence(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    VarDecl {
        kind: VarKind,
        name: String,
        init: Option<Expr>,
    },
    FuncDecl {
        name: String,
        params: Vec<String>,
        body: Rc<Vec<Stmt>>,
    },
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Vec<Stmt>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        binding: String,
        object: Expr,
        body: Box<Stmt>,
    },
    ForOf {
        binding: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    /// Cases run with fallthrough from the first strict-equality match (or
    /// the default case); `Break` exits.
    Switch {
        discriminant: Expr,
        cases: Vec<(Option<Expr>, Vec<Stmt>)>,
    },
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        catch: Option<(Option<String>, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    },
    Empty,
}

impl Stmt {
    /// True for constructs that make an implicit-return rewrite unsafe when
    /// they appear at the top level of a script body.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Stmt::If { .. }
                | Stmt::While { .. }
                | Stmt::DoWhile { .. }
                | Stmt::For { .. }
                | Stmt::ForIn { .. }
                | Stmt::ForOf { .. }
                | Stmt::Switch { .. }
                | Stmt::Try { .. }
                | Stmt::Throw(_)
                | Stmt::Break
                | Stmt::Continue
        )
    }
}
