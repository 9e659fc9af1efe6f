//! Read-only traversal of a [`Program`].
//!
//! Implementors override the `visit_*` methods they care about and call the
//! matching `walk_*` function to keep descending.

use crate::program::ast::*;

pub trait Visitor {
    fn visit_type(&mut self, decl: &TypeDecl) {
        walk_type(self, decl);
    }

    fn visit_member(&mut self, member: &Member) {
        walk_member(self, member);
    }

    fn visit_body(&mut self, body: &Body) {
        walk_body(self, body);
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// Called for every resolved reference in the tree.
    fn visit_symbol_ref(&mut self, _reference: &SymbolRef) {}
}

/// Visit every declaration and statement of `program`.
pub fn walk_program<V: Visitor + ?Sized>(visitor: &mut V, program: &Program) {
    for decl in &program.types {
        visitor.visit_type(decl);
    }
    visitor.visit_block(&program.body);
}

pub fn walk_type<V: Visitor + ?Sized>(visitor: &mut V, decl: &TypeDecl) {
    if let Some(base) = &decl.base {
        visitor.visit_symbol_ref(base);
    }
    for member in &decl.members {
        visitor.visit_member(member);
    }
}

pub fn walk_member<V: Visitor + ?Sized>(visitor: &mut V, member: &Member) {
    match member {
        Member::Method(method) => visitor.visit_body(&method.body),
        Member::Constructor(ctor) => visitor.visit_body(&ctor.body),
        Member::Property(property) => {
            for accessor in &property.accessors {
                visitor.visit_body(&accessor.body);
            }
        }
        Member::Field(field) => {
            if let Some(init) = &field.init {
                visitor.visit_expr(init);
            }
        }
        Member::Type(nested) => visitor.visit_type(nested),
    }
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &Body) {
    match body {
        Body::Block(block) => visitor.visit_block(block),
        Body::Expr { expr, .. } => visitor.visit_expr(expr),
    }
}

pub fn walk_block<V: Visitor + ?Sized>(visitor: &mut V, block: &Block) {
    for stmt in &block.stmts {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Expr(expr) => visitor.visit_expr(expr),
        Stmt::Local { init, .. } => {
            if let Some(init) = init {
                visitor.visit_expr(init);
            }
        }
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            visitor.visit_expr(cond);
            visitor.visit_stmt(then);
            if let Some(otherwise) = otherwise {
                visitor.visit_stmt(otherwise);
            }
        }
        Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
            visitor.visit_expr(cond);
            visitor.visit_stmt(body);
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
        } => {
            for stmt in init {
                visitor.visit_stmt(stmt);
            }
            if let Some(cond) = cond {
                visitor.visit_expr(cond);
            }
            for expr in step {
                visitor.visit_expr(expr);
            }
            visitor.visit_stmt(body);
        }
        Stmt::ForEach { iterable, body, .. } => {
            visitor.visit_expr(iterable);
            visitor.visit_stmt(body);
        }
        Stmt::Labeled { stmt, .. } => visitor.visit_stmt(stmt),
        Stmt::Return(Some(expr)) => visitor.visit_expr(expr),
        Stmt::Block(block) => visitor.visit_block(block),
        Stmt::TryFinally { body, finally } => {
            visitor.visit_block(body);
            visitor.visit_block(finally);
        }
        Stmt::Goto(_)
        | Stmt::Break
        | Stmt::Continue
        | Stmt::Return(None)
        | Stmt::Guard(_) => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Name(reference) => visitor.visit_symbol_ref(reference),
        Expr::Member { target, member } => {
            visitor.visit_expr(target);
            visitor.visit_symbol_ref(member);
        }
        Expr::Call {
            callee,
            receiver,
            args,
        } => {
            if let Some(receiver) = receiver {
                visitor.visit_expr(receiver);
            }
            visitor.visit_symbol_ref(callee);
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::Invoke { target, args } => {
            visitor.visit_expr(target);
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::New { ty, ctor, args } => {
            visitor.visit_symbol_ref(ty);
            if let Some(ctor) = ctor {
                visitor.visit_symbol_ref(ctor);
            }
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::NewArray { element, len } => {
            visitor.visit_symbol_ref(element);
            visitor.visit_expr(len);
        }
        Expr::Index { target, index } => {
            visitor.visit_expr(target);
            visitor.visit_expr(index);
        }
        Expr::Lambda(lambda) => visitor.visit_body(&lambda.body),
        Expr::Await(inner) => visitor.visit_expr(inner),
        Expr::Unary { operand, .. } => visitor.visit_expr(operand),
        Expr::Binary { lhs, rhs, .. } => {
            visitor.visit_expr(lhs);
            visitor.visit_expr(rhs);
        }
        Expr::Assign { target, value } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        Expr::Guarded { inner, .. } => visitor.visit_expr(inner),
        Expr::Literal(_) | Expr::This | Expr::GuardSlot(_) => {}
    }
}
