//! Tree-walking evaluation of instrumented programs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BoxError, GuardError, Result};
use crate::eval::unit::{EvalUnit, Function};
use crate::eval::value::{Closure, Object, Value};
use crate::program::ast::{
    BinaryOp, Block, Body, Expr, GeneratedInfo, GuardHook, Literal, Stmt, UnaryOp, ValueHook,
};
use crate::program::symbols::{ResolvedSymbol, SymbolId, SymbolKind};
use crate::runtime::context;
use crate::runtime::guard::RuntimeGuard;
use crate::runtime::hooks;

/// A failure raised by guest code.
pub(crate) fn guest(message: impl Into<String>) -> BoxError {
    BoxError::Guest(anyhow::Error::msg(message.into()))
}

fn null_reference() -> BoxError {
    guest("object reference not set to an instance of an object")
}

/// Host functions may return our own errors, for example when they run a
/// nested script. Those keep their kind; anything else is a guest failure.
fn host_error(err: anyhow::Error) -> BoxError {
    match err.downcast::<BoxError>() {
        Ok(err) => err,
        Err(err) => match err.downcast::<GuardError>() {
            Ok(err) => BoxError::Guard(err),
            Err(err) => BoxError::Guest(err),
        },
    }
}

/// How a statement finished.
#[derive(Debug)]
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
    Goto(SymbolId),
}

#[derive(Debug, Default)]
struct Frame {
    locals: HashMap<SymbolId, Value>,
    this: Option<Value>,
}

impl Frame {
    fn with_this(this: Option<Value>) -> Self {
        Self {
            locals: HashMap::new(),
            this,
        }
    }

    fn this(&self) -> Result<Value> {
        self.this
            .clone()
            .ok_or_else(|| guest("'this' is not available in a static context"))
    }
}

/// Evaluation state of a single run.
pub(crate) struct Machine<'a> {
    unit: &'a EvalUnit,
    guard: &'a RuntimeGuard,
    generated: GeneratedInfo,
    globals: Option<Value>,
}

impl<'a> Machine<'a> {
    pub fn new(
        unit: &'a EvalUnit,
        guard: &'a RuntimeGuard,
        generated: GeneratedInfo,
        globals: Option<Value>,
    ) -> Self {
        Self {
            unit,
            guard,
            generated,
            globals,
        }
    }

    pub fn run_top_level(&self, body: &Block) -> Result<Value> {
        let mut frame = Frame::default();
        let flow = self.exec_block(&mut frame, body)?;
        finish(flow)
    }

    fn symbol(&self, id: SymbolId) -> Result<&'a ResolvedSymbol> {
        self.unit
            .program
            .symbols
            .get(id)
            .ok_or_else(|| guest(format!("unknown symbol {id}")))
    }

    fn is_declared(&self, id: SymbolId) -> bool {
        self.unit.program.is_declared(id)
    }

    fn guard_for(&self, field: SymbolId) -> Result<&'a RuntimeGuard> {
        if field != self.generated.guard_field {
            return Err(guest(format!("{field} is not this script's guard field")));
        }
        Ok(self.guard)
    }

    // Statements

    fn exec_block(&self, frame: &mut Frame, block: &Block) -> Result<Flow> {
        let mut pc = 0;
        while let Some(stmt) = block.stmts.get(pc) {
            match self.exec(frame, stmt)? {
                Flow::Normal => pc += 1,
                Flow::Goto(label) => match find_label(&block.stmts, label) {
                    Some(target) => pc = target,
                    None => return Ok(Flow::Goto(label)),
                },
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&self, frame: &mut Frame, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(frame, expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Local { symbol, init } => {
                let value = match init {
                    Some(init) => self.eval(frame, init)?,
                    None => Value::Null,
                };
                frame.locals.insert(*symbol, value);
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.condition(frame, cond)? {
                    self.exec(frame, then)
                } else if let Some(otherwise) = otherwise {
                    self.exec(frame, otherwise)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.condition(frame, cond)? {
                    match self.exec(frame, body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec(frame, body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                    if !self.condition(frame, cond)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                for stmt in init {
                    match self.exec(frame, stmt)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.condition(frame, cond)? {
                            break;
                        }
                    }
                    match self.exec(frame, body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                    for expr in step {
                        self.eval(frame, expr)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForEach {
                binding,
                iterable,
                body,
            } => {
                let items = elements(self.eval(frame, iterable)?)?;
                for item in items {
                    frame.locals.insert(*binding, item);
                    match self.exec(frame, body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Labeled { stmt, .. } => self.exec(frame, stmt),
            Stmt::Goto(label) => Ok(Flow::Goto(*label)),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Block(block) => self.exec_block(frame, block),
            Stmt::TryFinally { body, finally } => {
                let outcome = self.exec_block(frame, body);
                self.exec_block(frame, finally)?;
                outcome
            }
            Stmt::Guard(call) => {
                let guard = self.guard_for(call.guard)?;
                match call.hook {
                    GuardHook::EnterMethod => {
                        // Code compiled for one script must not run inside another.
                        context::current_guard(self.generated.gid)?;
                        hooks::enter_method(guard)?;
                    }
                    GuardHook::EnterStaticInit => hooks::enter_static_init(guard)?,
                    GuardHook::ExitStaticInit => hooks::exit_static_init(guard),
                    GuardHook::BeforeJump => hooks::before_jump(guard)?,
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn condition(&self, frame: &mut Frame, cond: &Expr) -> Result<bool> {
        let value = self.eval(frame, cond)?;
        value
            .as_bool()
            .ok_or_else(|| guest(format!("expected a bool condition, found {}", value.type_name())))
    }

    // Expressions

    fn eval(&self, frame: &mut Frame, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Str(s) => Value::from(s.as_str()),
            }),
            Expr::Name(name) => self.load_name(frame, name.symbol),
            Expr::This => frame.this(),
            Expr::Member { target, member } => {
                let receiver = self.receiver(frame, target)?;
                self.load_member(receiver, member.symbol)
            }
            Expr::Call {
                callee,
                receiver,
                args,
            } => {
                let receiver = match receiver {
                    Some(receiver) => self.receiver(frame, receiver)?,
                    None => None,
                };
                let args = self.eval_args(frame, args)?;
                self.call(frame, callee.symbol, receiver, args)
            }
            Expr::Invoke { target, args } => {
                let target = self.eval(frame, target)?;
                let args = self.eval_args(frame, args)?;
                match target {
                    Value::Closure(closure) => self.invoke_closure(&closure, args),
                    Value::Null => Err(null_reference()),
                    other => Err(guest(format!("cannot invoke a value of type {}", other.type_name()))),
                }
            }
            Expr::New { ty, ctor, args } => {
                let args = self.eval_args(frame, args)?;
                self.construct(ty.symbol, ctor.map(|c| c.symbol), args)
            }
            Expr::NewArray { len, .. } => {
                let len = self.array_length(frame, len)?;
                Ok(Value::array(vec![Value::Null; len]))
            }
            Expr::Index { target, index } => {
                let target = self.eval(frame, target)?;
                let index = self.eval(frame, index)?;
                let index = index
                    .as_int()
                    .ok_or_else(|| guest(format!("index must be an int, found {}", index.type_name())))?;
                let out_of_range = || guest(format!("index {index} is out of range"));
                let index = usize::try_from(index).map_err(|_| out_of_range())?;
                match target {
                    Value::Array(items) => items.lock().get(index).cloned().ok_or_else(out_of_range),
                    Value::Str(s) => s
                        .chars()
                        .nth(index)
                        .map(|c| Value::from(c.to_string()))
                        .ok_or_else(out_of_range),
                    Value::Null => Err(null_reference()),
                    other => Err(guest(format!("cannot index a value of type {}", other.type_name()))),
                }
            }
            Expr::Lambda(lambda) => Ok(Value::Closure(Arc::new(Closure {
                params: lambda.params.clone(),
                body: lambda.body.clone(),
                captured: frame.locals.clone(),
                this: frame.this.clone(),
            }))),
            // Host calls complete synchronously, so the awaited value is ready.
            Expr::Await(inner) => self.eval(frame, inner),
            Expr::Unary { op, operand } => match (op, self.eval(frame, operand)?) {
                (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (op, value) => Err(guest(format!(
                    "operator {op:?} cannot be applied to {}",
                    value.type_name()
                ))),
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => Ok(Value::Bool(
                    self.condition(frame, lhs)? && self.condition(frame, rhs)?,
                )),
                BinaryOp::Or => Ok(Value::Bool(
                    self.condition(frame, lhs)? || self.condition(frame, rhs)?,
                )),
                op => {
                    let lhs = self.eval(frame, lhs)?;
                    let rhs = self.eval(frame, rhs)?;
                    binary(*op, lhs, rhs)
                }
            },
            Expr::Assign { target, value } => self.assign(frame, target, value),
            Expr::Guarded { hook, guard, inner } => self.guarded(frame, *hook, *guard, inner),
            Expr::GuardSlot(_) => Err(guest("the guard slot is bound when the script is loaded")),
        }
    }

    fn eval_args(&self, frame: &mut Frame, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.eval(frame, arg)).collect()
    }

    /// Evaluate the target of a member access. Type names yield no receiver.
    fn receiver(&self, frame: &mut Frame, target: &Expr) -> Result<Option<Value>> {
        if let Expr::Name(name) = target {
            if self.symbol(name.symbol)?.kind == SymbolKind::Type {
                return Ok(None);
            }
        }
        self.eval(frame, target).map(Some)
    }

    fn array_length(&self, frame: &mut Frame, len: &Expr) -> Result<usize> {
        let len = self.eval(frame, len)?;
        let len = len
            .as_int()
            .ok_or_else(|| guest(format!("array length must be an int, found {}", len.type_name())))?;
        usize::try_from(len).map_err(|_| guest(format!("array length {len} is negative")))
    }

    fn guarded(&self, frame: &mut Frame, hook: ValueHook, guard: SymbolId, inner: &Expr) -> Result<Value> {
        let guard = self.guard_for(guard)?;
        match hook {
            ValueHook::AfterNewObject => {
                let object = self.eval(frame, inner)?;
                Ok(hooks::after_new_object(guard, object)?)
            }
            ValueHook::AfterNewArray => match inner {
                Expr::NewArray { len, .. } => {
                    let len = self.array_length(frame, len)?;
                    // Count before materializing so an oversized length fails
                    // without allocating.
                    guard.guard_count(len as u64)?;
                    Ok(Value::array(vec![Value::Null; len]))
                }
                other => {
                    let array = self.eval(frame, other)?;
                    if let Value::Array(items) = &array {
                        hooks::after_new_array(guard, &*items.lock())?;
                    }
                    Ok(array)
                }
            },
            ValueHook::BeforeAwait => {
                let value = self.eval(frame, inner)?;
                Ok(hooks::before_await(guard, value))
            }
            ValueHook::AfterAwait => {
                let value = self.eval(frame, inner)?;
                Ok(hooks::after_await(guard, value))
            }
        }
    }

    // Names and members

    fn load_name(&self, frame: &Frame, id: SymbolId) -> Result<Value> {
        if let Some(value) = frame.locals.get(&id) {
            return Ok(value.clone());
        }
        if Some(id) == self.generated.globals_field {
            return Ok(self.globals.clone().unwrap_or_default());
        }

        let symbol = self.symbol(id)?;
        match symbol.kind {
            SymbolKind::Field if self.is_declared(id) => {
                if symbol.is_static {
                    self.load_static(id, symbol.containing)
                } else {
                    load_field(&frame.this()?, id)
                }
            }
            SymbolKind::Property if self.unit.index.properties.contains_key(&id) => {
                let this = if symbol.is_static { None } else { frame.this.clone() };
                self.get_property(id, this)
            }
            SymbolKind::Field | SymbolKind::Property => self.call_host(id, None, &[]),
            SymbolKind::Local | SymbolKind::Parameter => {
                Err(guest(format!("use of unassigned local '{}'", symbol.name)))
            }
            _ => Err(guest(format!("'{}' is not a value", symbol.display_name()))),
        }
    }

    fn load_member(&self, receiver: Option<Value>, id: SymbolId) -> Result<Value> {
        let symbol = self.symbol(id)?;
        match symbol.kind {
            SymbolKind::Field if self.is_declared(id) => {
                if symbol.is_static {
                    self.load_static(id, symbol.containing)
                } else {
                    load_field(&receiver.unwrap_or_default(), id)
                }
            }
            SymbolKind::Property if self.unit.index.properties.contains_key(&id) => {
                let this = if symbol.is_static { None } else { receiver };
                self.get_property(id, this)
            }
            _ if self.unit.host.contains_key(&id) => self.call_host(id, receiver.as_ref(), &[]),
            _ if symbol.name == "Length" => match receiver {
                Some(Value::Array(items)) => Ok(Value::Int(items.lock().len() as i64)),
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
                Some(Value::Null) => Err(null_reference()),
                _ => self.call_host(id, receiver.as_ref(), &[]),
            },
            _ => self.call_host(id, receiver.as_ref(), &[]),
        }
    }

    fn load_static(&self, field: SymbolId, owner: Option<SymbolId>) -> Result<Value> {
        if let Some(owner) = owner {
            self.ensure_initialized(owner)?;
        }
        Ok(self.unit.statics.lock().get(&field).cloned().unwrap_or_default())
    }

    fn store_static(&self, field: SymbolId, owner: Option<SymbolId>, value: Value) -> Result<()> {
        if let Some(owner) = owner {
            self.ensure_initialized(owner)?;
        }
        self.unit.statics.lock().insert(field, value);
        Ok(())
    }

    fn get_property(&self, property: SymbolId, this: Option<Value>) -> Result<Value> {
        let getter = self
            .unit
            .index
            .properties
            .get(&property)
            .and_then(|p| p.get.as_ref())
            .ok_or_else(|| guest(format!("property {property} has no getter")))?;
        self.invoke(getter, this, Vec::new())
    }

    fn set_property(&self, property: SymbolId, this: Option<Value>, value: Value) -> Result<()> {
        let setter = self
            .unit
            .index
            .properties
            .get(&property)
            .and_then(|p| p.set.as_ref())
            .ok_or_else(|| guest(format!("property {property} is read only")))?;
        let mut args = vec![value];
        args.truncate(setter.params.len());
        self.invoke(setter, this, args)?;
        Ok(())
    }

    fn assign(&self, frame: &mut Frame, target: &Expr, value: &Expr) -> Result<Value> {
        match target {
            Expr::Name(name) => {
                let value = self.eval(frame, value)?;
                self.store_name(frame, name.symbol, value.clone())?;
                Ok(value)
            }
            Expr::Member { target, member } => {
                let receiver = self.receiver(frame, target)?;
                let value = self.eval(frame, value)?;
                self.store_member(receiver, member.symbol, value.clone())?;
                Ok(value)
            }
            Expr::Index { target, index } => {
                let target = self.eval(frame, target)?;
                let index = self.eval(frame, index)?;
                let value = self.eval(frame, value)?;
                let items = match target {
                    Value::Array(items) => items,
                    Value::Null => return Err(null_reference()),
                    other => {
                        return Err(guest(format!("cannot index a value of type {}", other.type_name())));
                    }
                };
                let slot = index
                    .as_int()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| guest(format!("invalid array index {index:?}")))?;
                let mut items = items.lock();
                let len = items.len();
                let element = items
                    .get_mut(slot)
                    .ok_or_else(|| guest(format!("index {slot} is out of range for length {len}")))?;
                *element = value.clone();
                Ok(value)
            }
            _ => Err(guest("invalid assignment target")),
        }
    }

    fn store_name(&self, frame: &mut Frame, id: SymbolId, value: Value) -> Result<()> {
        if Some(id) == self.generated.globals_field {
            return Err(guest("the globals instance cannot be replaced"));
        }
        let symbol = self.symbol(id)?;
        match symbol.kind {
            SymbolKind::Local | SymbolKind::Parameter => {
                frame.locals.insert(id, value);
                Ok(())
            }
            SymbolKind::Field if self.is_declared(id) => {
                if symbol.is_static {
                    self.store_static(id, symbol.containing, value)
                } else {
                    store_field(&frame.this()?, id, value)
                }
            }
            SymbolKind::Property if self.unit.index.properties.contains_key(&id) => {
                let this = if symbol.is_static { None } else { frame.this.clone() };
                self.set_property(id, this, value)
            }
            SymbolKind::Field | SymbolKind::Property => self.call_host(id, None, &[value]).map(drop),
            _ => Err(guest(format!("cannot assign to '{}'", symbol.display_name()))),
        }
    }

    fn store_member(&self, receiver: Option<Value>, id: SymbolId, value: Value) -> Result<()> {
        let symbol = self.symbol(id)?;
        match symbol.kind {
            SymbolKind::Field if self.is_declared(id) => {
                if symbol.is_static {
                    self.store_static(id, symbol.containing, value)
                } else {
                    store_field(&receiver.unwrap_or_default(), id, value)
                }
            }
            SymbolKind::Property if self.unit.index.properties.contains_key(&id) => {
                let this = if symbol.is_static { None } else { receiver };
                self.set_property(id, this, value)
            }
            _ => self.call_host(id, receiver.as_ref(), &[value]).map(drop),
        }
    }

    // Calls

    fn call(
        &self,
        frame: &Frame,
        callee: SymbolId,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let index = &self.unit.index;
        let Some(function) = index.methods.get(&callee) else {
            return self.call_host(callee, receiver.as_ref(), &args);
        };

        let this = if function.is_static {
            None
        } else {
            receiver.or_else(|| frame.this.clone())
        };
        let function = match &this {
            Some(Value::Object(object)) => {
                let base = self.unit.program.symbols.original_definition(callee);
                index
                    .overrides
                    .get(&(object.ty, base))
                    .and_then(|m| index.methods.get(m))
                    .unwrap_or(function)
            }
            Some(Value::Null) => return Err(null_reference()),
            _ => function,
        };
        self.invoke(function, this, args)
    }

    fn call_host(&self, id: SymbolId, receiver: Option<&Value>, args: &[Value]) -> Result<Value> {
        let Some(host) = self.unit.host.get(&id) else {
            let name = self.symbol(id).map(|s| s.display_name().to_string())?;
            return Err(guest(format!("no host binding for {name}")));
        };
        host(receiver, args).map_err(host_error)
    }

    fn invoke(&self, function: &Function, this: Option<Value>, args: Vec<Value>) -> Result<Value> {
        if args.len() != function.params.len() {
            return Err(guest(format!(
                "expected {} arguments, got {}",
                function.params.len(),
                args.len()
            )));
        }
        if function.is_static {
            if let Some(owner) = function.owner {
                self.ensure_initialized(owner)?;
            }
        }

        let mut frame = Frame::with_this(this);
        frame.locals.extend(function.params.iter().copied().zip(args));
        self.run_body(&mut frame, &function.body)
    }

    fn invoke_closure(&self, closure: &Closure, args: Vec<Value>) -> Result<Value> {
        if args.len() != closure.params.len() {
            return Err(guest(format!(
                "delegate expects {} arguments, got {}",
                closure.params.len(),
                args.len()
            )));
        }
        let mut frame = Frame {
            locals: closure.captured.clone(),
            this: closure.this.clone(),
        };
        frame.locals.extend(closure.params.iter().copied().zip(args));
        self.run_body(&mut frame, &closure.body)
    }

    fn run_body(&self, frame: &mut Frame, body: &Body) -> Result<Value> {
        match body {
            Body::Expr { expr, .. } => self.eval(frame, expr),
            Body::Block(block) => {
                let flow = self.exec_block(frame, block)?;
                finish(flow)
            }
        }
    }

    fn construct(&self, ty: SymbolId, ctor: Option<SymbolId>, args: Vec<Value>) -> Result<Value> {
        let index = &self.unit.index;
        let Some(info) = index.types.get(&ty) else {
            // Host types are built by a binding for the constructor, or for
            // the type itself when no constructor was resolved.
            let factory = ctor.filter(|c| self.unit.host.contains_key(c)).unwrap_or(ty);
            return self.call_host(factory, None, &args);
        };

        self.ensure_initialized(ty)?;
        let object = Arc::new(Object {
            ty,
            fields: Mutex::new(HashMap::new()),
        });
        let this = Value::Object(Arc::clone(&object));

        let mut frame = Frame::with_this(Some(this.clone()));
        for (field, init) in &info.instance_fields {
            let value = match init {
                Some(init) => self.eval(&mut frame, init)?,
                None => Value::Null,
            };
            object.fields.lock().insert(*field, value);
        }

        match ctor.and_then(|c| index.methods.get(&c)) {
            Some(ctor) => {
                self.invoke(ctor, Some(this.clone()), args)?;
            }
            None if !args.is_empty() => {
                return Err(guest(format!("type {ty} has no constructor taking arguments")));
            }
            None => {}
        }
        Ok(this)
    }

    /// Run static field initializers and the static constructor of `ty` the
    /// first time one of its static members is used.
    fn ensure_initialized(&self, ty: SymbolId) -> Result<()> {
        let Some(info) = self.unit.index.types.get(&ty) else {
            return Ok(());
        };
        if !self.unit.initialized.lock().insert(ty) {
            return Ok(());
        }

        let result = self.initialize_type(info.static_fields.as_slice(), info.static_ctor.as_deref());
        if result.is_err() {
            // A later run gets another attempt.
            self.unit.initialized.lock().remove(&ty);
        }
        result
    }

    fn initialize_type(
        &self,
        fields: &[(SymbolId, Option<Expr>)],
        ctor: Option<&Function>,
    ) -> Result<()> {
        let mut frame = Frame::default();
        for (field, init) in fields {
            let value = match init {
                Some(Expr::GuardSlot(_)) => continue,
                Some(init) => self.eval(&mut frame, init)?,
                None => Value::Null,
            };
            self.unit.statics.lock().insert(*field, value);
        }
        if let Some(ctor) = ctor {
            self.invoke(ctor, None, Vec::new())?;
        }
        tracing::trace!("static initialization finished");
        Ok(())
    }
}

fn finish(flow: Flow) -> Result<Value> {
    match flow {
        Flow::Normal => Ok(Value::Null),
        Flow::Return(value) => Ok(value),
        Flow::Break | Flow::Continue => Err(guest("break or continue outside of a loop")),
        Flow::Goto(label) => Err(guest(format!("no label {label} in scope"))),
    }
}

fn find_label(stmts: &[Stmt], label: SymbolId) -> Option<usize> {
    stmts
        .iter()
        .position(|s| matches!(s, Stmt::Labeled { label: l, .. } if *l == label))
}

fn load_field(target: &Value, field: SymbolId) -> Result<Value> {
    match target {
        Value::Object(object) => Ok(object.fields.lock().get(&field).cloned().unwrap_or_default()),
        Value::Null => Err(null_reference()),
        other => Err(guest(format!("a {} has no field {field}", other.type_name()))),
    }
}

fn store_field(target: &Value, field: SymbolId, value: Value) -> Result<()> {
    match target {
        Value::Object(object) => {
            object.fields.lock().insert(field, value);
            Ok(())
        }
        Value::Null => Err(null_reference()),
        other => Err(guest(format!("a {} has no field {field}", other.type_name()))),
    }
}

fn elements(iterable: Value) -> Result<Vec<Value>> {
    match iterable {
        Value::Array(items) => Ok(items.lock().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        Value::Null => Err(null_reference()),
        other => Err(guest(format!("cannot iterate a value of type {}", other.type_name()))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    match (op, &lhs, &rhs) {
        (BinaryOp::Eq, ..) => Ok(Value::Bool(lhs.same(&rhs))),
        (BinaryOp::Ne, ..) => Ok(Value::Bool(!lhs.same(&rhs))),
        (BinaryOp::Add, Value::Str(_), _) | (BinaryOp::Add, _, Value::Str(_)) => {
            Ok(Value::from(format!("{lhs}{rhs}")))
        }
        (_, Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            Ok(match op {
                BinaryOp::Add => Value::Int(a.wrapping_add(b)),
                BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
                BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                    return Err(guest("attempted to divide by zero"));
                }
                BinaryOp::Div => Value::Int(a.wrapping_div(b)),
                BinaryOp::Rem => Value::Int(a.wrapping_rem(b)),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Ge => Value::Bool(a >= b),
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => {
                    return Err(guest(format!("operator {op:?} is not arithmetic")));
                }
            })
        }
        _ => Err(guest(format!(
            "operator {op:?} cannot be applied to {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_wraps() {
        let v = binary(BinaryOp::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap();
        assert_eq!(v, Value::Int(i64::MIN));
        assert_eq!(
            binary(BinaryOp::Rem, Value::Int(7), Value::Int(3)).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_divide_by_zero_is_a_guest_failure() {
        let err = binary(BinaryOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert!(err.is_guest());
        assert!(err.to_string().contains("divide by zero"));
    }

    #[test]
    fn test_string_concatenation_formats_operands() {
        let v = binary(BinaryOp::Add, Value::from("n="), Value::Int(4)).unwrap();
        assert_eq!(v.as_str(), Some("n=4"));
        let v = binary(BinaryOp::Add, Value::Bool(true), Value::from("!")).unwrap();
        assert_eq!(v.as_str(), Some("True!"));
    }

    #[test]
    fn test_host_errors_keep_their_kind() {
        let err = host_error(anyhow::Error::new(GuardError::Memory { limit: 3 }));
        assert!(err.is_memory_limit());

        let err = host_error(anyhow::Error::new(BoxError::NoCurrentContext));
        assert!(matches!(err, BoxError::NoCurrentContext));

        let err = host_error(anyhow::anyhow!("disk full"));
        assert!(err.is_guest());
    }

    #[test]
    fn test_labels_are_found_by_symbol() {
        let mut table = crate::program::symbols::SymbolTable::new();
        let a = table.define_local(SymbolKind::Label, "a");
        let b = table.define_local(SymbolKind::Label, "b");
        let stmts = vec![
            Stmt::Break,
            Stmt::Labeled {
                label: b,
                stmt: Box::new(Stmt::Continue),
            },
        ];
        assert_eq!(find_label(&stmts, b), Some(1));
        assert_eq!(find_label(&stmts, a), None);
    }
}
