//! Generates the per-script declarations instrumented code relies on.
//!
//! Each script gets a type named after its guard id holding a static
//! `RuntimeGuard` field. When the host supplies a globals type, the generated
//! type also holds the globals instance and one forwarder per public instance
//! method and property, so top-level code can call them unqualified.

use std::collections::HashMap;

use crate::program::ast::*;
use crate::program::symbols::{ResolvedSymbol, Span, SymbolId, SymbolKind};
use crate::runtime::registry::GuardId;

pub const GUARD_FIELD_NAME: &str = "RuntimeGuard";
pub const GLOBALS_FIELD_NAME: &str = "Globals";

/// Name of the generated type for `gid`.
pub fn generated_type_name(gid: GuardId) -> String {
    format!("_BoxScriptGenerated{}_{}", gid.index(), gid.generation())
}

/// Result of [`generate`].
#[derive(Debug, Clone)]
pub struct Generated {
    pub info: GeneratedInfo,
    /// Globals members and the forwarders standing in for them.
    pub redirects: HashMap<SymbolId, SymbolId>,
}

/// Declare the generated type in `program` and insert it as the first type.
pub fn generate(program: &mut Program, gid: GuardId, globals: Option<SymbolId>) -> Generated {
    let name = generated_type_name(gid);
    let symbols = &mut program.symbols;

    let class = symbols.define_type(&name, None);
    if let Some(symbol) = symbols.get_mut(class) {
        symbol.is_static = true;
    }
    let guard_field = static_field(program, class, GUARD_FIELD_NAME);

    let mut decl = TypeDecl::new(class);
    decl.members.push(Member::Field(FieldDecl {
        symbol: guard_field,
        init: Some(Expr::GuardSlot(gid)),
    }));

    let mut redirects = HashMap::new();
    let globals_field = globals.map(|globals_type| {
        let field = static_field(program, class, GLOBALS_FIELD_NAME);
        decl.members.push(Member::Field(FieldDecl {
            symbol: field,
            init: None,
        }));

        for (target, original) in forwardable_members(program, globals_type) {
            let (forwarder, member) = forwarder(program, class, field, target, original);
            decl.members.push(member);
            redirects.insert(target, forwarder);
        }
        field
    });

    program.declare(class);
    program.types.insert(0, decl);

    let info = GeneratedInfo {
        gid,
        class,
        guard_field,
        globals_field,
    };
    program.generated = Some(info);

    tracing::trace!(%gid, class = %name, forwarders = redirects.len(), "generated script type");
    Generated { info, redirects }
}

fn static_field(program: &mut Program, class: SymbolId, name: &str) -> SymbolId {
    let field = program
        .symbols
        .define_member(class, SymbolKind::Field, name, None);
    if let Some(symbol) = program.symbols.get_mut(field) {
        symbol.is_static = true;
    }
    program.declare(field)
}

fn forwardable_members(
    program: &Program,
    globals_type: SymbolId,
) -> Vec<(SymbolId, ResolvedSymbol)> {
    program
        .symbols
        .iter()
        .filter(|(_, s)| {
            s.containing == Some(globals_type)
                && s.is_public
                && !s.is_static
                && matches!(s.kind, SymbolKind::Method | SymbolKind::Property)
        })
        .map(|(id, s)| (id, s.clone()))
        .collect()
}

fn forwarder(
    program: &mut Program,
    class: SymbolId,
    globals_field: SymbolId,
    target: SymbolId,
    original: ResolvedSymbol,
) -> (SymbolId, Member) {
    let globals = Expr::name(globals_field, Span::NONE);

    let mut symbol = ResolvedSymbol::new(original.kind, original.name)
        .with_containing(class)
        .with_parameters(original.parameters.iter().cloned())
        .static_member();
    symbol.locations = original.locations;
    let id = program.symbols.insert(symbol);
    program.declare(id);

    let member = match original.kind {
        SymbolKind::Property => Member::Property(PropertyDecl {
            symbol: id,
            accessors: vec![Accessor {
                kind: AccessorKind::Get,
                value_param: None,
                body: Body::Expr {
                    expr: Expr::Member {
                        target: Box::new(globals),
                        member: SymbolRef::new(target, Span::NONE),
                    },
                    span: Span::NONE,
                },
            }],
        }),
        _ => {
            let params: Vec<SymbolId> = original
                .parameters
                .iter()
                .map(|name| {
                    let param = program.symbols.define_local(SymbolKind::Parameter, name);
                    program.declare(param)
                })
                .collect();
            let args = params.iter().map(|p| Expr::name(*p, Span::NONE)).collect();
            Member::Method(MethodDecl {
                symbol: id,
                params,
                body: Body::Expr {
                    expr: Expr::Call {
                        callee: SymbolRef::new(target, Span::NONE),
                        receiver: Some(Box::new(globals)),
                        args,
                    },
                    span: Span::NONE,
                },
                is_async: false,
            })
        }
    };

    (id, member)
}
