//! Lowering from the oxc AST to the owned IR.
//!
//! Runs only on scripts that already passed the security policy. Lowering is
//! total over the accepted subset; constructs outside it (classes,
//! generators, destructuring, spread, labels) surface as
//! [`CompileError::Unsupported`] with a script position.

use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast;
use oxc_parser::Parser;
use oxc_span::{GetSpan, Span};
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};

use crate::compile::CompileError;
use crate::ir::{BinOp, Expr, Key, Lit, LogicalOp, Stmt, Target, UnaryOp, UpdateOp, VarKind};
use crate::parse::{script_position, script_source_type, unwrap_body, wrap_script};

/// Parse and lower a script body. The caller is responsible for having
/// validated the script first.
pub fn lower_script(script: &str) -> Result<Vec<Stmt>, CompileError> {
    let wrapped = wrap_script(script);
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &wrapped, script_source_type()).parse();
    if !ret.errors.is_empty() {
        // Compilation re-validates before lowering, so reaching this branch
        // means the caller bypassed validation.
        return Err(CompileError::Syntax {
            message: ret.errors[0].to_string(),
            line: 1,
            column: 1,
        });
    }
    let Some(body) = unwrap_body(&ret.program) else {
        return Err(CompileError::Syntax {
            message: "script did not parse as a function body".to_string(),
            line: 1,
            column: 1,
        });
    };

    let lowerer = Lowerer { script };
    let mut out = Vec::with_capacity(body.statements.len());
    lowerer.stmts(&body.statements, &mut out)?;
    Ok(out)
}

struct Lowerer<'s> {
    script: &'s str,
}

impl<'s> Lowerer<'s> {
    fn unsupported<T>(&self, construct: &str, span: Span) -> Result<T, CompileError> {
        let (line, column) = script_position(self.script, span.start as usize);
        Err(CompileError::Unsupported {
            construct: construct.to_string(),
            line,
            column,
        })
    }

    fn stmts(&self, stmts: &[ast::Statement], out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        for stmt in stmts {
            self.stmt(stmt, out)?;
        }
        Ok(())
    }

    /// Lower into exactly one statement, for single-statement positions like
    /// an `if` arm or a loop body.
    fn single(&self, stmt: &ast::Statement) -> Result<Stmt, CompileError> {
        let mut out = Vec::with_capacity(1);
        self.stmt(stmt, &mut out)?;
        Ok(if out.len() == 1 {
            out.remove(0)
        } else {
            Stmt::Block(out)
        })
    }

    fn stmt(&self, stmt: &ast::Statement, out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        use ast::Statement as S;
        match stmt {
            S::VariableDeclaration(decl) => self.var_decl(decl, out),
            S::FunctionDeclaration(func) => {
                let Some(id) = &func.id else {
                    return self.unsupported("anonymous function declaration", func.span);
                };
                let Some(body) = &func.body else {
                    return self.unsupported("function without a body", func.span);
                };
                if func.generator {
                    return self.unsupported("generator function", func.span);
                }
                let mut body_ir = vec![];
                self.stmts(&body.statements, &mut body_ir)?;
                out.push(Stmt::FuncDecl {
                    name: id.name.to_string(),
                    params: self.params(&func.params)?,
                    body: Rc::new(body_ir),
                });
                Ok(())
            }
            S::ExpressionStatement(es) => {
                out.push(Stmt::Expr(self.expr(&es.expression)?));
                Ok(())
            }
            S::BlockStatement(block) => {
                let mut body = vec![];
                self.stmts(&block.body, &mut body)?;
                out.push(Stmt::Block(body));
                Ok(())
            }
            S::IfStatement(if_stmt) => {
                out.push(Stmt::If {
                    test: self.expr(&if_stmt.test)?,
                    consequent: Box::new(self.single(&if_stmt.consequent)?),
                    alternate: match &if_stmt.alternate {
                        Some(alt) => Some(Box::new(self.single(alt)?)),
                        None => None,
                    },
                });
                Ok(())
            }
            S::ReturnStatement(ret) => {
                out.push(Stmt::Return(match &ret.argument {
                    Some(arg) => Some(self.expr(arg)?),
                    None => None,
                }));
                Ok(())
            }
            S::ThrowStatement(throw) => {
                out.push(Stmt::Throw(self.expr(&throw.argument)?));
                Ok(())
            }
            S::WhileStatement(while_stmt) => {
                out.push(Stmt::While {
                    test: self.expr(&while_stmt.test)?,
                    body: Box::new(self.single(&while_stmt.body)?),
                });
                Ok(())
            }
            S::DoWhileStatement(do_stmt) => {
                out.push(Stmt::DoWhile {
                    body: Box::new(self.single(&do_stmt.body)?),
                    test: self.expr(&do_stmt.test)?,
                });
                Ok(())
            }
            S::ForStatement(for_stmt) => {
                let mut init = vec![];
                if let Some(for_init) = &for_stmt.init {
                    match for_init {
                        ast::ForStatementInit::VariableDeclaration(decl) => {
                            self.var_decl(decl, &mut init)?
                        }
                        other => match other.as_expression() {
                            Some(e) => init.push(Stmt::Expr(self.expr(e)?)),
                            None => return self.unsupported("for-loop initializer", for_stmt.span),
                        },
                    }
                }
                out.push(Stmt::For {
                    init,
                    test: match &for_stmt.test {
                        Some(t) => Some(self.expr(t)?),
                        None => None,
                    },
                    update: match &for_stmt.update {
                        Some(u) => Some(self.expr(u)?),
                        None => None,
                    },
                    body: Box::new(self.single(&for_stmt.body)?),
                });
                Ok(())
            }
            S::ForInStatement(for_in) => {
                out.push(Stmt::ForIn {
                    binding: self.for_binding(&for_in.left, for_in.span)?,
                    object: self.expr(&for_in.right)?,
                    body: Box::new(self.single(&for_in.body)?),
                });
                Ok(())
            }
            S::ForOfStatement(for_of) => {
                out.push(Stmt::ForOf {
                    binding: self.for_binding(&for_of.left, for_of.span)?,
                    iterable: self.expr(&for_of.right)?,
                    body: Box::new(self.single(&for_of.body)?),
                });
                Ok(())
            }
            S::SwitchStatement(switch) => {
                let mut cases = vec![];
                for case in &switch.cases {
                    let test = match &case.test {
                        Some(t) => Some(self.expr(t)?),
                        None => None,
                    };
                    let mut body = vec![];
                    self.stmts(&case.consequent, &mut body)?;
                    cases.push((test, body));
                }
                out.push(Stmt::Switch {
                    discriminant: self.expr(&switch.discriminant)?,
                    cases,
                });
                Ok(())
            }
            S::BreakStatement(brk) => {
                if brk.label.is_some() {
                    return self.unsupported("labeled break", brk.span);
                }
                out.push(Stmt::Break);
                Ok(())
            }
            S::ContinueStatement(cont) => {
                if cont.label.is_some() {
                    return self.unsupported("labeled continue", cont.span);
                }
                out.push(Stmt::Continue);
                Ok(())
            }
            S::TryStatement(try_stmt) => {
                let mut block = vec![];
                self.stmts(&try_stmt.block.body, &mut block)?;
                let catch = match &try_stmt.handler {
                    Some(handler) => {
                        let param = match &handler.param {
                            Some(p) => match &p.pattern {
                                ast::BindingPattern::BindingIdentifier(id) => {
                                    Some(id.name.to_string())
                                }
                                _ => return self.unsupported("catch pattern", handler.span),
                            },
                            None => None,
                        };
                        let mut body = vec![];
                        self.stmts(&handler.body.body, &mut body)?;
                        Some((param, body))
                    }
                    None => None,
                };
                let finally = match &try_stmt.finalizer {
                    Some(fin) => {
                        let mut body = vec![];
                        self.stmts(&fin.body, &mut body)?;
                        Some(body)
                    }
                    None => None,
                };
                out.push(Stmt::Try {
                    block,
                    catch,
                    finally,
                });
                Ok(())
            }
            S::EmptyStatement(_) | S::DebuggerStatement(_) => {
                out.push(Stmt::Empty);
                Ok(())
            }
            S::ClassDeclaration(class) => self.unsupported("class declaration", class.span),
            S::LabeledStatement(labeled) => self.unsupported("labeled statement", labeled.span),
            S::WithStatement(with) => self.unsupported("with statement", with.span),
            other => self.unsupported("statement", other.span()),
        }
    }

    fn var_decl(
        &self,
        decl: &ast::VariableDeclaration,
        out: &mut Vec<Stmt>,
    ) -> Result<(), CompileError> {
        let kind = match decl.kind {
            ast::VariableDeclarationKind::Var => VarKind::Var,
            ast::VariableDeclarationKind::Let => VarKind::Let,
            ast::VariableDeclarationKind::Const => VarKind::Const,
            _ => return self.unsupported("declaration kind", decl.span),
        };
        for declarator in &decl.declarations {
            let ast::BindingPattern::BindingIdentifier(id) = &declarator.id else {
                return self.unsupported("destructuring declaration", decl.span);
            };
            out.push(Stmt::VarDecl {
                kind,
                name: id.name.to_string(),
                init: match &declarator.init {
                    Some(init) => Some(self.expr(init)?),
                    None => None,
                },
            });
        }
        Ok(())
    }

    fn for_binding(
        &self,
        left: &ast::ForStatementLeft,
        span: Span,
    ) -> Result<String, CompileError> {
        match left {
            ast::ForStatementLeft::VariableDeclaration(decl) => {
                if decl.declarations.len() != 1 {
                    return self.unsupported("multiple loop bindings", span);
                }
                match &decl.declarations[0].id {
                    ast::BindingPattern::BindingIdentifier(id) => Ok(id.name.to_string()),
                    _ => self.unsupported("destructuring loop binding", span),
                }
            }
            ast::ForStatementLeft::AssignmentTargetIdentifier(id) => Ok(id.name.to_string()),
            _ => self.unsupported("loop binding", span),
        }
    }

    fn params(&self, params: &ast::FormalParameters) -> Result<Vec<String>, CompileError> {
        if params.rest.is_some() {
            return self.unsupported("rest parameter", params.span);
        }
        let mut names = Vec::with_capacity(params.items.len());
        for param in &params.items {
            match &param.pattern {
                ast::BindingPattern::BindingIdentifier(id) => names.push(id.name.to_string()),
                _ => return self.unsupported("parameter pattern", params.span),
            }
        }
        Ok(names)
    }

    fn args(&self, args: &[ast::Argument]) -> Result<Vec<Expr>, CompileError> {
        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            match arg.as_expression() {
                Some(e) => lowered.push(self.expr(e)?),
                None => return self.unsupported("spread argument", arg.span()),
            }
        }
        Ok(lowered)
    }

    fn call(&self, call: &ast::CallExpression) -> Result<Expr, CompileError> {
        Ok(Expr::Call {
            callee: Box::new(self.expr(&call.callee)?),
            args: self.args(&call.arguments)?,
            optional: call.optional,
        })
    }

    fn static_member(&self, member: &ast::StaticMemberExpression) -> Result<Expr, CompileError> {
        Ok(Expr::Member {
            object: Box::new(self.expr(&member.object)?),
            key: Key::Static(member.property.name.to_string()),
            optional: member.optional,
        })
    }

    fn computed_member(
        &self,
        member: &ast::ComputedMemberExpression,
    ) -> Result<Expr, CompileError> {
        Ok(Expr::Member {
            object: Box::new(self.expr(&member.object)?),
            key: Key::Computed(Box::new(self.expr(&member.expression)?)),
            optional: member.optional,
        })
    }

    fn assignment_target(&self, target: &ast::AssignmentTarget) -> Result<Target, CompileError> {
        match target {
            ast::AssignmentTarget::AssignmentTargetIdentifier(id) => {
                Ok(Target::Ident(id.name.to_string()))
            }
            ast::AssignmentTarget::StaticMemberExpression(member) => Ok(Target::Member {
                object: Box::new(self.expr(&member.object)?),
                key: Key::Static(member.property.name.to_string()),
            }),
            ast::AssignmentTarget::ComputedMemberExpression(member) => Ok(Target::Member {
                object: Box::new(self.expr(&member.object)?),
                key: Key::Computed(Box::new(self.expr(&member.expression)?)),
            }),
            other => self.unsupported("assignment target", other.span()),
        }
    }

    fn arrow_body(&self, func: &ast::ArrowFunctionExpression) -> Result<Vec<Stmt>, CompileError> {
        let mut body = vec![];
        self.stmts(&func.body.statements, &mut body)?;
        // `x => expr` parses as a single expression statement; it returns the
        // expression's value.
        if func.expression && body.len() == 1 {
            if let Stmt::Expr(_) = body[0] {
                if let Stmt::Expr(e) = body.remove(0) {
                    body.push(Stmt::Return(Some(e)));
                }
            }
        }
        Ok(body)
    }

    fn expr(&self, expr: &ast::Expression) -> Result<Expr, CompileError> {
        use ast::Expression as E;
        match expr {
            E::NullLiteral(_) => Ok(Expr::Lit(Lit::Null)),
            E::BooleanLiteral(lit) => Ok(Expr::Lit(Lit::Bool(lit.value))),
            E::NumericLiteral(lit) => Ok(Expr::Lit(Lit::Num(lit.value))),
            E::StringLiteral(lit) => Ok(Expr::Lit(Lit::Str(lit.value.to_string()))),
            E::TemplateLiteral(tpl) => {
                let quasis = tpl
                    .quasis
                    .iter()
                    .map(|q| {
                        q.value
                            .cooked
                            .as_ref()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| q.value.raw.to_string())
                    })
                    .collect();
                let mut exprs = Vec::with_capacity(tpl.expressions.len());
                for e in &tpl.expressions {
                    exprs.push(self.expr(e)?);
                }
                Ok(Expr::Template { quasis, exprs })
            }
            E::Identifier(id) => Ok(Expr::Ident(id.name.to_string())),
            E::ThisExpression(_) => Ok(Expr::This),
            E::ArrayExpression(arr) => {
                let mut items = Vec::with_capacity(arr.elements.len());
                for elem in &arr.elements {
                    match elem.as_expression() {
                        Some(e) => items.push(self.expr(e)?),
                        None => match elem {
                            ast::ArrayExpressionElement::Elision(_) => {
                                items.push(Expr::Ident("undefined".to_string()))
                            }
                            other => return self.unsupported("spread element", other.span()),
                        },
                    }
                }
                Ok(Expr::Array(items))
            }
            E::ObjectExpression(obj) => {
                let mut props = Vec::with_capacity(obj.properties.len());
                for prop in &obj.properties {
                    match prop {
                        ast::ObjectPropertyKind::ObjectProperty(p) => {
                            if p.kind != ast::PropertyKind::Init {
                                return self.unsupported("getter/setter property", p.span);
                            }
                            let key = if p.computed {
                                match p.key.as_expression() {
                                    Some(e) => Key::Computed(Box::new(self.expr(e)?)),
                                    None => return self.unsupported("property key", p.span),
                                }
                            } else {
                                match &p.key {
                                    ast::PropertyKey::StaticIdentifier(id) => {
                                        Key::Static(id.name.to_string())
                                    }
                                    ast::PropertyKey::StringLiteral(s) => {
                                        Key::Static(s.value.to_string())
                                    }
                                    ast::PropertyKey::NumericLiteral(n) => {
                                        Key::Static(n.value.to_string())
                                    }
                                    _ => return self.unsupported("property key", p.span),
                                }
                            };
                            props.push((key, self.expr(&p.value)?));
                        }
                        ast::ObjectPropertyKind::SpreadProperty(s) => {
                            return self.unsupported("spread property", s.span)
                        }
                    }
                }
                Ok(Expr::Object(props))
            }
            E::FunctionExpression(func) => {
                let Some(body) = &func.body else {
                    return self.unsupported("function without a body", func.span);
                };
                if func.generator {
                    return self.unsupported("generator function", func.span);
                }
                let mut body_ir = vec![];
                self.stmts(&body.statements, &mut body_ir)?;
                Ok(Expr::Function {
                    name: func.id.as_ref().map(|id| id.name.to_string()),
                    params: self.params(&func.params)?,
                    body: Rc::new(body_ir),
                })
            }
            E::ArrowFunctionExpression(func) => Ok(Expr::Arrow {
                params: self.params(&func.params)?,
                body: Rc::new(self.arrow_body(func)?),
            }),
            E::UnaryExpression(unary) => {
                let op = match unary.operator {
                    UnaryOperator::UnaryNegation => UnaryOp::Neg,
                    UnaryOperator::UnaryPlus => UnaryOp::Plus,
                    UnaryOperator::LogicalNot => UnaryOp::Not,
                    UnaryOperator::BitwiseNot => UnaryOp::BitNot,
                    UnaryOperator::Typeof => UnaryOp::TypeOf,
                    UnaryOperator::Void => UnaryOp::Void,
                    UnaryOperator::Delete => UnaryOp::Delete,
                };
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(self.expr(&unary.argument)?),
                })
            }
            E::UpdateExpression(update) => {
                let target = match &update.argument {
                    ast::SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                        Target::Ident(id.name.to_string())
                    }
                    ast::SimpleAssignmentTarget::StaticMemberExpression(member) => Target::Member {
                        object: Box::new(self.expr(&member.object)?),
                        key: Key::Static(member.property.name.to_string()),
                    },
                    ast::SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                        Target::Member {
                            object: Box::new(self.expr(&member.object)?),
                            key: Key::Computed(Box::new(self.expr(&member.expression)?)),
                        }
                    }
                    other => return self.unsupported("update target", other.span()),
                };
                Ok(Expr::Update {
                    op: match update.operator {
                        UpdateOperator::Increment => UpdateOp::Inc,
                        UpdateOperator::Decrement => UpdateOp::Dec,
                    },
                    prefix: update.prefix,
                    target: Box::new(target),
                })
            }
            E::BinaryExpression(bin) => {
                let op = match bin.operator {
                    BinaryOperator::Addition => BinOp::Add,
                    BinaryOperator::Subtraction => BinOp::Sub,
                    BinaryOperator::Multiplication => BinOp::Mul,
                    BinaryOperator::Division => BinOp::Div,
                    BinaryOperator::Remainder => BinOp::Rem,
                    BinaryOperator::Exponential => BinOp::Pow,
                    BinaryOperator::Equality => BinOp::Eq,
                    BinaryOperator::Inequality => BinOp::Ne,
                    BinaryOperator::StrictEquality => BinOp::StrictEq,
                    BinaryOperator::StrictInequality => BinOp::StrictNe,
                    BinaryOperator::LessThan => BinOp::Lt,
                    BinaryOperator::LessEqualThan => BinOp::Le,
                    BinaryOperator::GreaterThan => BinOp::Gt,
                    BinaryOperator::GreaterEqualThan => BinOp::Ge,
                    BinaryOperator::ShiftLeft => BinOp::Shl,
                    BinaryOperator::ShiftRight => BinOp::Shr,
                    BinaryOperator::ShiftRightZeroFill => BinOp::UShr,
                    BinaryOperator::BitwiseAnd => BinOp::BitAnd,
                    BinaryOperator::BitwiseOR => BinOp::BitOr,
                    BinaryOperator::BitwiseXOR => BinOp::BitXor,
                    BinaryOperator::In => BinOp::In,
                    BinaryOperator::Instanceof => BinOp::InstanceOf,
                };
                Ok(Expr::Binary {
                    op,
                    left: Box::new(self.expr(&bin.left)?),
                    right: Box::new(self.expr(&bin.right)?),
                })
            }
            E::LogicalExpression(logical) => Ok(Expr::Logical {
                op: match logical.operator {
                    LogicalOperator::And => LogicalOp::And,
                    LogicalOperator::Or => LogicalOp::Or,
                    LogicalOperator::Coalesce => LogicalOp::Nullish,
                },
                left: Box::new(self.expr(&logical.left)?),
                right: Box::new(self.expr(&logical.right)?),
            }),
            E::ConditionalExpression(cond) => Ok(Expr::Conditional {
                test: Box::new(self.expr(&cond.test)?),
                consequent: Box::new(self.expr(&cond.consequent)?),
                alternate: Box::new(self.expr(&cond.alternate)?),
            }),
            E::AssignmentExpression(assign) => {
                let op = match assign.operator {
                    AssignmentOperator::Assign => None,
                    AssignmentOperator::Addition => Some(BinOp::Add),
                    AssignmentOperator::Subtraction => Some(BinOp::Sub),
                    AssignmentOperator::Multiplication => Some(BinOp::Mul),
                    AssignmentOperator::Division => Some(BinOp::Div),
                    AssignmentOperator::Remainder => Some(BinOp::Rem),
                    AssignmentOperator::Exponential => Some(BinOp::Pow),
                    AssignmentOperator::ShiftLeft => Some(BinOp::Shl),
                    AssignmentOperator::ShiftRight => Some(BinOp::Shr),
                    AssignmentOperator::ShiftRightZeroFill => Some(BinOp::UShr),
                    AssignmentOperator::BitwiseAnd => Some(BinOp::BitAnd),
                    AssignmentOperator::BitwiseOR => Some(BinOp::BitOr),
                    AssignmentOperator::BitwiseXOR => Some(BinOp::BitXor),
                    _ => return self.unsupported("logical assignment", assign.span),
                };
                Ok(Expr::Assign {
                    op,
                    target: Box::new(self.assignment_target(&assign.left)?),
                    value: Box::new(self.expr(&assign.right)?),
                })
            }
            E::SequenceExpression(seq) => {
                let mut exprs = Vec::with_capacity(seq.expressions.len());
                for e in &seq.expressions {
                    exprs.push(self.expr(e)?);
                }
                Ok(Expr::Sequence(exprs))
            }
            E::CallExpression(call) => self.call(call),
            E::NewExpression(new_expr) => Ok(Expr::New {
                callee: Box::new(self.expr(&new_expr.callee)?),
                args: self.args(&new_expr.arguments)?,
            }),
            E::StaticMemberExpression(member) => self.static_member(member),
            E::ComputedMemberExpression(member) => self.computed_member(member),
            E::ChainExpression(chain) => match &chain.expression {
                ast::ChainElement::CallExpression(call) => self.call(call),
                ast::ChainElement::StaticMemberExpression(member) => self.static_member(member),
                ast::ChainElement::ComputedMemberExpression(member) => {
                    self.computed_member(member)
                }
                other => self.unsupported("optional chain", other.span()),
            },
            E::ParenthesizedExpression(paren) => self.expr(&paren.expression),
            E::AwaitExpression(await_expr) => {
                Ok(Expr::Await(Box::new(self.expr(&await_expr.argument)?)))
            }
            E::RegExpLiteral(lit) => self.unsupported("regex literal", lit.span),
            E::BigIntLiteral(lit) => self.unsupported("bigint literal", lit.span),
            E::ClassExpression(class) => self.unsupported("class expression", class.span),
            E::YieldExpression(y) => self.unsupported("yield", y.span),
            E::TaggedTemplateExpression(t) => self.unsupported("tagged template", t.span),
            E::ImportExpression(i) => self.unsupported("dynamic import", i.span),
            other => self.unsupported("expression", other.span()),
        }
    }
}
