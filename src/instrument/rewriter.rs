//! Inserts accounting calls into a program.
//!
//! The rewrite consumes the tree and rebuilds it bottom-up:
//!
//! * every method, instance constructor, accessor and lambda body starts with
//!   an `EnterMethod` call, and so does the top-level body
//! * static constructors are bracketed by `EnterStaticInit` and an
//!   `ExitStaticInit` that runs however the initializer finishes
//! * loop bodies and labeled statements start with `BeforeJump`
//! * object and array construction is wrapped in an allocation hook
//! * awaited operands pass through `BeforeAwait` and `AfterAwait`

use std::collections::HashMap;

use crate::program::ast::*;
use crate::program::symbols::SymbolId;

#[derive(Debug, Clone)]
pub struct Instrumenter {
    guard: SymbolId,
    /// Call targets replaced by generated forwarders.
    redirects: HashMap<SymbolId, SymbolId>,
}

impl Instrumenter {
    /// `guard` is the generated static field holding the guard.
    pub fn new(guard: SymbolId) -> Self {
        Self {
            guard,
            redirects: HashMap::new(),
        }
    }

    /// Route unqualified references to `from` through `to` instead.
    pub fn with_redirects(mut self, redirects: HashMap<SymbolId, SymbolId>) -> Self {
        self.redirects = redirects;
        self
    }

    /// Rewrite every declaration and the top-level body. The generated type,
    /// if already present, is left alone.
    pub fn rewrite(&self, mut program: Program) -> Program {
        let generated = program.generated.map(|g| g.class);

        program.types = std::mem::take(&mut program.types)
            .into_iter()
            .map(|decl| {
                if Some(decl.symbol) == generated {
                    decl
                } else {
                    self.type_decl(decl)
                }
            })
            .collect();

        let mut body = self.block(std::mem::take(&mut program.body));
        body.stmts.insert(0, self.guard_stmt(GuardHook::EnterMethod));
        program.body = body;
        program
    }

    fn guard_stmt(&self, hook: GuardHook) -> Stmt {
        Stmt::Guard(GuardCall {
            hook,
            guard: self.guard,
        })
    }

    fn guarded(&self, hook: ValueHook, inner: Expr) -> Expr {
        Expr::Guarded {
            hook,
            guard: self.guard,
            inner: Box::new(inner),
        }
    }

    fn type_decl(&self, decl: TypeDecl) -> TypeDecl {
        TypeDecl {
            members: decl
                .members
                .into_iter()
                .map(|member| self.member(member))
                .collect(),
            ..decl
        }
    }

    fn member(&self, member: Member) -> Member {
        match member {
            Member::Method(method) => Member::Method(MethodDecl {
                body: self.entered(method.body),
                ..method
            }),
            Member::Constructor(ctor) if ctor.is_static => Member::Constructor(ConstructorDecl {
                body: self.static_init(ctor.body),
                ..ctor
            }),
            Member::Constructor(ctor) => Member::Constructor(ConstructorDecl {
                body: self.entered(ctor.body),
                ..ctor
            }),
            Member::Property(property) => Member::Property(PropertyDecl {
                accessors: property
                    .accessors
                    .into_iter()
                    .map(|accessor| Accessor {
                        body: self.entered(accessor.body),
                        ..accessor
                    })
                    .collect(),
                ..property
            }),
            Member::Field(field) => Member::Field(FieldDecl {
                init: field.init.map(|init| self.expr(init)),
                ..field
            }),
            Member::Type(nested) => Member::Type(self.type_decl(nested)),
        }
    }

    /// Prefix a body with `EnterMethod`. Expression bodies become a block
    /// returning the expression, on the expression's own line.
    fn entered(&self, body: Body) -> Body {
        let enter = self.guard_stmt(GuardHook::EnterMethod);
        match body {
            Body::Block(block) => {
                let mut block = self.block(block);
                block.stmts.insert(0, enter);
                Body::Block(block)
            }
            Body::Expr { expr, span } => Body::Block(
                Block::new(vec![enter, Stmt::Return(Some(self.expr(expr)))]).at(span),
            ),
        }
    }

    fn static_init(&self, body: Body) -> Body {
        let span = body.span();
        let inner = match body {
            Body::Block(block) => self.block(block),
            Body::Expr { expr, span } => Block::new(vec![Stmt::Expr(self.expr(expr))]).at(span),
        };
        Body::Block(
            Block::new(vec![
                self.guard_stmt(GuardHook::EnterStaticInit),
                Stmt::TryFinally {
                    body: inner,
                    finally: Block::new(vec![self.guard_stmt(GuardHook::ExitStaticInit)]),
                },
            ])
            .at(span),
        )
    }

    fn block(&self, block: Block) -> Block {
        Block {
            stmts: block.stmts.into_iter().map(|s| self.stmt(s)).collect(),
            span: block.span,
        }
    }

    /// Prefix a loop body or labeled statement with `BeforeJump`.
    fn jump_target(&self, stmt: Stmt) -> Box<Stmt> {
        let jump = self.guard_stmt(GuardHook::BeforeJump);
        Box::new(match self.stmt(stmt) {
            Stmt::Block(mut block) => {
                block.stmts.insert(0, jump);
                Stmt::Block(block)
            }
            other => Stmt::Block(Block::new(vec![jump, other])),
        })
    }

    fn stmt(&self, stmt: Stmt) -> Stmt {
        match stmt {
            Stmt::Expr(expr) => Stmt::Expr(self.expr(expr)),
            Stmt::Local { symbol, init } => Stmt::Local {
                symbol,
                init: init.map(|e| self.expr(e)),
            },
            Stmt::If {
                cond,
                then,
                otherwise,
            } => Stmt::If {
                cond: self.expr(cond),
                then: Box::new(self.stmt(*then)),
                otherwise: otherwise.map(|s| Box::new(self.stmt(*s))),
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: self.expr(cond),
                body: self.jump_target(*body),
            },
            Stmt::DoWhile { body, cond } => Stmt::DoWhile {
                body: self.jump_target(*body),
                cond: self.expr(cond),
            },
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => Stmt::For {
                init: init.into_iter().map(|s| self.stmt(s)).collect(),
                cond: cond.map(|e| self.expr(e)),
                step: step.into_iter().map(|e| self.expr(e)).collect(),
                body: self.jump_target(*body),
            },
            Stmt::ForEach {
                binding,
                iterable,
                body,
            } => Stmt::ForEach {
                binding,
                iterable: self.expr(iterable),
                body: self.jump_target(*body),
            },
            Stmt::Labeled { label, stmt } => Stmt::Labeled {
                label,
                stmt: self.jump_target(*stmt),
            },
            Stmt::Return(value) => Stmt::Return(value.map(|e| self.expr(e))),
            Stmt::Block(block) => Stmt::Block(self.block(block)),
            Stmt::TryFinally { body, finally } => Stmt::TryFinally {
                body: self.block(body),
                finally: self.block(finally),
            },
            Stmt::Goto(_) | Stmt::Break | Stmt::Continue | Stmt::Guard(_) => stmt,
        }
    }

    fn exprs(&self, exprs: Vec<Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&self, expr: Box<Expr>) -> Box<Expr> {
        Box::new(self.expr(*expr))
    }

    fn redirect(&self, reference: SymbolRef) -> SymbolRef {
        match self.redirects.get(&reference.symbol) {
            Some(to) => SymbolRef::new(*to, reference.span),
            None => reference,
        }
    }

    fn expr(&self, expr: Expr) -> Expr {
        match expr {
            Expr::Name(reference) => Expr::Name(self.redirect(reference)),
            Expr::Member { target, member } => Expr::Member {
                target: self.boxed(target),
                member,
            },
            Expr::Call {
                callee,
                receiver: None,
                args,
            } => Expr::Call {
                callee: self.redirect(callee),
                receiver: None,
                args: self.exprs(args),
            },
            Expr::Call {
                callee,
                receiver: Some(receiver),
                args,
            } => Expr::Call {
                callee,
                receiver: Some(self.boxed(receiver)),
                args: self.exprs(args),
            },
            Expr::Invoke { target, args } => Expr::Invoke {
                target: self.boxed(target),
                args: self.exprs(args),
            },
            Expr::New { ty, ctor, args } => self.guarded(
                ValueHook::AfterNewObject,
                Expr::New {
                    ty,
                    ctor,
                    args: self.exprs(args),
                },
            ),
            Expr::NewArray { element, len } => self.guarded(
                ValueHook::AfterNewArray,
                Expr::NewArray {
                    element,
                    len: self.boxed(len),
                },
            ),
            Expr::Index { target, index } => Expr::Index {
                target: self.boxed(target),
                index: self.boxed(index),
            },
            Expr::Lambda(lambda) => Expr::Lambda(Box::new(Lambda {
                params: lambda.params,
                body: self.entered(lambda.body),
            })),
            Expr::Await(operand) => {
                let before = self.guarded(ValueHook::BeforeAwait, self.expr(*operand));
                self.guarded(ValueHook::AfterAwait, Expr::Await(Box::new(before)))
            }
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: self.boxed(operand),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: self.boxed(lhs),
                rhs: self.boxed(rhs),
            },
            Expr::Assign { target, value } => Expr::Assign {
                target: self.boxed(target),
                value: self.boxed(value),
            },
            Expr::Guarded { hook, guard, inner } => Expr::Guarded {
                hook,
                guard,
                inner: self.boxed(inner),
            },
            Expr::Literal(_) | Expr::This | Expr::GuardSlot(_) => expr,
        }
    }
}
