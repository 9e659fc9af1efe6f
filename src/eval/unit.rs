//! The runnable form of an instrumented program.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compiler::interfaces::{ScriptFuture, ScriptUnit};
use crate::error::{BoxError, Result};
use crate::eval::machine::{guest, Machine};
use crate::eval::value::{HostFn, Value};
use crate::program::ast::{AccessorKind, Body, Expr, GeneratedInfo, Member, Program, TypeDecl};
use crate::program::symbols::SymbolId;
use crate::runtime::context;
use crate::runtime::guard::GuardHandle;
use crate::runtime::hooks;
use crate::runtime::registry::{GuardId, GuardRegistry};

/// A method, constructor or accessor body ready to be invoked.
#[derive(Debug)]
pub(crate) struct Function {
    /// Declaring type.
    pub owner: Option<SymbolId>,
    pub is_static: bool,
    pub params: Vec<SymbolId>,
    pub body: Body,
}

#[derive(Debug, Default)]
pub(crate) struct TypeInfo {
    pub static_fields: Vec<(SymbolId, Option<Expr>)>,
    pub instance_fields: Vec<(SymbolId, Option<Expr>)>,
    pub static_ctor: Option<Arc<Function>>,
}

#[derive(Debug, Default)]
pub(crate) struct Property {
    pub get: Option<Arc<Function>>,
    pub set: Option<Arc<Function>>,
}

/// Lookup tables over the declarations of a program.
#[derive(Debug, Default)]
pub(crate) struct Index {
    /// Methods and instance constructors.
    pub methods: HashMap<SymbolId, Arc<Function>>,
    pub properties: HashMap<SymbolId, Property>,
    pub types: HashMap<SymbolId, TypeInfo>,
    /// `(declaring type, overridden method)` to the overriding method.
    pub overrides: HashMap<(SymbolId, SymbolId), SymbolId>,
}

impl Index {
    pub fn build(program: &Program) -> Self {
        let mut index = Index::default();
        for decl in &program.types {
            index.add_type(program, decl);
        }
        index
    }

    fn add_type(&mut self, program: &Program, decl: &TypeDecl) {
        let is_static = |symbol: SymbolId| program.symbols.get(symbol).is_some_and(|s| s.is_static);
        let function = |symbol: SymbolId, params: Vec<SymbolId>, body: &Body| {
            Arc::new(Function {
                owner: Some(decl.symbol),
                is_static: is_static(symbol),
                params,
                body: body.clone(),
            })
        };

        let mut info = TypeInfo::default();
        for member in &decl.members {
            match member {
                Member::Method(method) => {
                    self.methods.insert(
                        method.symbol,
                        function(method.symbol, method.params.clone(), &method.body),
                    );
                    let base = program
                        .symbols
                        .get(method.symbol)
                        .filter(|s| s.is_override)
                        .and_then(|s| s.overridden);
                    if let Some(base) = base {
                        let base = program.symbols.original_definition(base);
                        self.overrides.insert((decl.symbol, base), method.symbol);
                    }
                }
                Member::Constructor(ctor) if ctor.is_static => {
                    info.static_ctor = Some(Arc::new(Function {
                        owner: Some(decl.symbol),
                        is_static: true,
                        params: ctor.params.clone(),
                        body: ctor.body.clone(),
                    }));
                }
                Member::Constructor(ctor) => {
                    self.methods.insert(
                        ctor.symbol,
                        Arc::new(Function {
                            owner: Some(decl.symbol),
                            is_static: false,
                            params: ctor.params.clone(),
                            body: ctor.body.clone(),
                        }),
                    );
                }
                Member::Property(property) => {
                    let mut entry = Property::default();
                    for accessor in &property.accessors {
                        match accessor.kind {
                            AccessorKind::Get => {
                                entry.get = Some(function(property.symbol, Vec::new(), &accessor.body));
                            }
                            AccessorKind::Set => {
                                let params = accessor.value_param.into_iter().collect();
                                entry.set = Some(function(property.symbol, params, &accessor.body));
                            }
                            AccessorKind::Add | AccessorKind::Remove => {}
                        }
                    }
                    self.properties.insert(property.symbol, entry);
                }
                Member::Field(field) => {
                    let entry = (field.symbol, field.init.clone());
                    if is_static(field.symbol) {
                        info.static_fields.push(entry);
                    } else {
                        info.instance_fields.push(entry);
                    }
                }
                Member::Type(nested) => self.add_type(program, nested),
            }
        }
        self.types.insert(decl.symbol, info);
    }
}

/// An instrumented program loaded into the interpreter.
///
/// Static state lives as long as the unit, so it carries over from one run
/// to the next.
pub struct EvalUnit {
    pub(crate) program: Program,
    pub(crate) index: Index,
    pub(crate) host: HashMap<SymbolId, HostFn>,
    guard: Option<GuardHandle>,
    pub(crate) statics: Mutex<HashMap<SymbolId, Value>>,
    pub(crate) initialized: Mutex<HashSet<SymbolId>>,
}

impl std::fmt::Debug for EvalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalUnit")
            .field("generated", &self.program.generated)
            .field("methods", &self.index.methods.len())
            .field("host_bindings", &self.host.len())
            .field("bound", &self.guard.is_some())
            .finish()
    }
}

impl EvalUnit {
    pub(crate) fn new(program: Program, index: Index, host: HashMap<SymbolId, HostFn>) -> Self {
        Self {
            program,
            index,
            host,
            guard: None,
            statics: Mutex::new(HashMap::new()),
            initialized: Mutex::new(HashSet::new()),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Current value of a static field declared by the script.
    pub fn static_value(&self, field: SymbolId) -> Option<Value> {
        self.statics.lock().get(&field).cloned()
    }

    fn bound(&self) -> Result<(&GuardHandle, GeneratedInfo)> {
        match (&self.guard, self.program.generated) {
            (Some(guard), Some(info)) => Ok((guard, info)),
            _ => Err(guest("script is not bound to a guard")),
        }
    }
}

impl ScriptUnit for EvalUnit {
    type Output = Value;
    type Globals = Value;

    fn bind_guard(&mut self, registry: &GuardRegistry, gid: GuardId) -> Result<()> {
        let info = self
            .program
            .generated
            .ok_or_else(|| guest("program has not been instrumented"))?;
        if info.gid != gid {
            return Err(BoxError::InvalidGuardId(gid));
        }
        self.guard = Some(hooks::init_static_field(registry, gid)?);
        Ok(())
    }

    fn entry(&self, globals: Option<Value>) -> ScriptFuture<'_, Value> {
        Box::pin(async move {
            let (guard, generated) = self.bound()?;
            context::current_guard(generated.gid)?;
            Machine::new(self, guard, generated, globals).run_top_level(&self.program.body)
        })
    }
}
