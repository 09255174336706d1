//! Tree-walking interpreter for Kestrel
//!
//! Statements execute to a [`Flow`] signal, expressions evaluate to a
//! [`Value`]. Runtime errors travel on the `Err` side of the same `Result`,
//! so `return`/`break`/`continue` can never be caught by `try`.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::ast::{AssignOp, BinaryOp, ClassDecl, Expr, FStringPart, LogicalOp, Program, Stmt, SwitchCase, UnaryOp};
use crate::engine::Runtime;
use crate::environment::Scope;
use crate::error::{ErrorKind, KestrelError, Result};
use crate::host::{accessor_name, dispatch, ProxyFactory};
use crate::stack::{ensure_sufficient_stack, CallDepth};
use crate::value::{BoundMethod, NativeFunction, ScriptClass, ScriptFunction, ScriptObject, Value};

/// Control-flow signal produced by executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// The Interpreter
pub struct Interpreter {
    runtime: Arc<Runtime>,
    globals: Scope,
    scope: Scope,
    loop_depth: usize,
    switch_depth: usize,
    function_depth: usize,
}

impl Interpreter {
    /// An interpreter running in the engine's global scope
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let scope = runtime.globals().clone();
        Self::with_scope(runtime, scope)
    }

    /// An interpreter running in a captured scope
    pub fn with_scope(runtime: Arc<Runtime>, scope: Scope) -> Self {
        runtime.collector().enter();
        Self {
            globals: runtime.globals().clone(),
            runtime,
            scope,
            loop_depth: 0,
            switch_depth: 0,
            function_depth: 0,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    /// The scope currently executing, as captured by closures and hand-offs
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Host context supplied at engine construction, if it has type `T`
    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.runtime.context()?.downcast::<T>().ok()
    }

    /// Enclosing object supplied by the host, if any
    pub fn enclosing(&self) -> Option<Value> {
        self.runtime.enclosing()
    }

    /// Run a program. Yields the value of a trailing expression statement.
    pub fn interpret(&mut self, program: &Program) -> Result<Value> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            last = match stmt {
                Stmt::Expr { expr } => self.evaluate(expr)?,
                _ => {
                    self.execute(stmt)?;
                    Value::Null
                }
            };
        }
        Ok(last)
    }

    pub fn execute(&mut self, stmt: &Stmt) -> Result<Flow> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt)).map_err(|e| e.or_span(stmt.span()))
    }

    /// Execute statements in `scope`, restoring the current scope afterwards
    pub fn execute_block(&mut self, stmts: &[Stmt], scope: Scope) -> Result<Flow> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = self.run_statements(stmts);
        self.scope = previous;
        result
    }

    fn execute_in(&mut self, stmt: &Stmt, scope: Scope) -> Result<Flow> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = self.execute(stmt);
        self.scope = previous;
        result
    }

    fn run_statements(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            match self.execute(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expr { expr } => {
                self.evaluate(expr)?;
                Ok(Flow::Normal)
            }

            Stmt::Var {
                name,
                initializer,
                constant,
                ..
            } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Null,
                };
                self.scope.declare(name.clone(), value, *constant)?;
                Ok(Flow::Normal)
            }

            Stmt::Assign { name, op, value, .. } => {
                let new_value = match op.binary() {
                    Some(bin) => {
                        let current = self.scope.get(name)?;
                        let rhs = self.evaluate(value)?;
                        binary_op(bin, &current, &rhs)?
                    }
                    None => self.evaluate(value)?,
                };
                self.scope.assign(name, new_value)?;
                Ok(Flow::Normal)
            }

            Stmt::Block { stmts, .. } => {
                let scope = Scope::with_parent(&self.scope);
                self.execute_block(stmts, scope)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While { condition, body, .. } => {
                self.loop_depth += 1;
                let result = self.run_while(condition, body);
                self.loop_depth -= 1;
                result
            }

            Stmt::ForIn {
                var, iterable, body, ..
            } => {
                let iterable = self.evaluate(iterable)?;
                let items = iteration_items(&iterable)?;
                self.loop_depth += 1;
                let result = self.run_for(var, items, body);
                self.loop_depth -= 1;
                result
            }

            Stmt::Switch { subject, cases, .. } => self.execute_switch(subject, cases),

            Stmt::Function { decl } => {
                let function = Value::Function(Arc::new(ScriptFunction::new(decl.clone(), self.scope.clone())));
                self.runtime.collector().track(&function);
                self.scope.define(decl.display_name(), function)?;
                Ok(Flow::Normal)
            }

            Stmt::Return { value, .. } => {
                if self.function_depth == 0 {
                    return Err(KestrelError::new(ErrorKind::ReturnOutsideFunction, None));
                }
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }

            Stmt::Break { .. } => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    return Err(KestrelError::new(ErrorKind::BreakOutsideLoop, None));
                }
                Ok(Flow::Break)
            }

            Stmt::Continue { .. } => {
                if self.loop_depth == 0 {
                    return Err(KestrelError::new(ErrorKind::ContinueOutsideLoop, None));
                }
                Ok(Flow::Continue)
            }

            Stmt::Class { decl } => {
                self.declare_class(decl)?;
                Ok(Flow::Normal)
            }

            Stmt::Import { path, .. } => {
                let qualified = path.join(".");
                let class = self
                    .runtime
                    .resolve_host_class(&qualified)
                    .ok_or_else(|| KestrelError::new(ErrorKind::ImportNotFound(qualified.clone()), None))?;
                let name = path.last().cloned().unwrap_or_else(|| class.name.clone());
                debug!(path = %qualified, "import");
                self.scope.define(name, Value::HostClass(class))?;
                Ok(Flow::Normal)
            }

            Stmt::Try {
                body,
                catch,
                finally,
                ..
            } => self.execute_try(body, catch.as_ref(), finally.as_deref()),
        }
    }

    fn run_while(&mut self, condition: &Expr, body: &Stmt) -> Result<Flow> {
        while self.evaluate(condition)?.is_truthy() {
            match self.execute(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Continue | Flow::Normal => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn run_for(&mut self, var: &str, items: Vec<Value>, body: &Stmt) -> Result<Flow> {
        for item in items {
            // Fresh binding per iteration so closures capture that iteration's value
            let scope = Scope::with_parent(&self.scope);
            scope.define(var, item)?;
            match self.execute_in(body, scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Continue | Flow::Normal => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_switch(&mut self, subject: &Expr, cases: &[SwitchCase]) -> Result<Flow> {
        let subject = self.evaluate(subject)?;

        let mut start = None;
        'search: for (i, case) in cases.iter().enumerate() {
            if let Some(values) = &case.values {
                for value in values {
                    if self.evaluate(value)? == subject {
                        start = Some(i);
                        break 'search;
                    }
                }
            }
        }
        let Some(start) = start.or_else(|| cases.iter().position(|c| c.values.is_none())) else {
            return Ok(Flow::Normal);
        };

        self.switch_depth += 1;
        let scope = Scope::with_parent(&self.scope);
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = self.run_cases(&cases[start..]);
        self.scope = previous;
        self.switch_depth -= 1;

        match result? {
            Flow::Break => Ok(Flow::Normal),
            flow => Ok(flow),
        }
    }

    /// Fall through from the first selected case until a signal stops it
    fn run_cases(&mut self, cases: &[SwitchCase]) -> Result<Flow> {
        for case in cases {
            match self.run_statements(&case.body)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_try(
        &mut self,
        body: &[Stmt],
        catch: Option<&(String, Vec<Stmt>)>,
        finally: Option<&[Stmt]>,
    ) -> Result<Flow> {
        let mut result = self.execute_block(body, Scope::with_parent(&self.scope));

        let caught = match (&result, catch) {
            (Err(err), Some((name, handler))) => Some((name, handler, error_value(err))),
            _ => None,
        };
        if let Some((name, handler, error)) = caught {
            debug!(line = error_line(&error), "caught runtime error");
            let scope = Scope::with_parent(&self.scope);
            scope.define(name.clone(), error)?;
            result = self.execute_block(handler, scope);
        }

        if let Some(finally) = finally {
            // A signal or error from `finally` replaces the pending outcome
            match self.execute_block(finally, Scope::with_parent(&self.scope))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    fn declare_class(&mut self, decl: &Arc<ClassDecl>) -> Result<()> {
        let (superclass, host_superclass) = match &decl.superclass {
            None => (None, None),
            Some((name, span)) => match self.scope.get(name).map_err(|e| e.or_span(*span))? {
                Value::Class(class) => (Some(class), None),
                Value::HostClass(class) => (None, Some(class)),
                other => {
                    return Err(type_error(format!(
                        "superclass of '{}' must be a class, got {}",
                        decl.name,
                        other.type_name()
                    ))
                    .or_span(*span))
                }
            },
        };

        let methods = decl
            .methods
            .iter()
            .map(|method| {
                let function = Arc::new(ScriptFunction::new(method.clone(), self.scope.clone()));
                self.runtime.collector().track(&Value::Function(function.clone()));
                (method.display_name().to_string(), function)
            })
            .collect();

        let class = ScriptClass {
            name: decl.name.clone(),
            decl: decl.clone(),
            methods,
            superclass,
            host_superclass,
            proxy_class: OnceLock::new(),
        };
        debug!(class = %decl.name, "declared class");
        self.scope.define(decl.name.clone(), Value::Class(Arc::new(class)))
    }

    /// Class call: static block, optional host proxy, then `init`
    fn instantiate(&mut self, class: &Arc<ScriptClass>, args: Vec<Value>) -> Result<Value> {
        let baked = self.run_static_block(class)?;
        let object = ScriptObject::instance(class.clone(), baked);

        let instance = match class.host_base() {
            Some(base) => Value::Host(ProxyFactory::instantiate(self, class, &base, object, &args)?),
            None => Value::Object(object),
        };

        if let Some(init) = class.find_method("init") {
            self.call_function(&init, Some(instance.clone()), args)?;
        }
        Ok(instance)
    }

    fn run_static_block(&mut self, class: &ScriptClass) -> Result<BTreeMap<String, Value>> {
        let Some(block) = &class.decl.static_block else {
            return Ok(BTreeMap::new());
        };
        let scope = Scope::with_parent(&self.globals);
        // Runs as top-level code, whatever loop or function declared the class
        let saved = (self.loop_depth, self.switch_depth, self.function_depth);
        (self.loop_depth, self.switch_depth, self.function_depth) = (0, 0, 0);
        let result = self.execute_block(block, scope.clone());
        (self.loop_depth, self.switch_depth, self.function_depth) = saved;
        result.map_err(|e| {
            KestrelError::runtime(
                format!("error executing static block for class '{}': {}", class.name, e.message()),
                e.span,
            )
        })?;
        Ok(scope
            .local_bindings()
            .into_iter()
            .map(|(name, value)| (accessor_name("get", &name), value))
            .collect())
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr)).map_err(|e| e.or_span(expr.span()))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Number { value, .. } => Ok(Value::Number(*value)),
            Expr::Float { value, .. } => Ok(Value::Float(*value)),
            Expr::String { value, .. } => Ok(Value::String(value.clone())),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Null { .. } => Ok(Value::Null),

            Expr::Variable { name, .. } => self.scope.get(name),

            Expr::This { .. } => self
                .scope
                .lookup("this")
                .ok_or_else(|| KestrelError::runtime("'this' can only be used inside a method", None)),

            Expr::Binary { left, op, right, .. } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary_op(*op, &left, &right)
            }

            Expr::Logical { left, op, right, .. } => {
                let left = self.evaluate(left)?;
                match op {
                    LogicalOp::Or if left.is_truthy() => Ok(left),
                    LogicalOp::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate(right),
                }
            }

            Expr::Unary { op, operand, .. } => {
                let value = self.evaluate(operand)?;
                match (op, &value) {
                    (UnaryOp::Not, _) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, other) => Err(type_error(format!(
                        "operand for unary '-' must be a number, got {}",
                        other.type_name()
                    ))),
                }
            }

            Expr::Call { callee, args, .. } => {
                let callee = self.evaluate(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg)?);
                }
                self.call_value(&callee, values)
            }

            Expr::Lambda { decl, .. } => {
                let function = Value::Function(Arc::new(ScriptFunction::new(decl.clone(), self.scope.clone())));
                self.runtime.collector().track(&function);
                Ok(function)
            }

            Expr::Get { object, name, .. } => {
                let object = self.evaluate(object)?;
                self.get_property(&object, name)
            }

            Expr::Set {
                object,
                name,
                op,
                value,
                ..
            } => {
                let target = self.evaluate(object)?;
                let new_value = match op.binary() {
                    Some(bin) => {
                        let current = self.read_property(&target, name, true)?;
                        let rhs = self.evaluate(value)?;
                        binary_op(bin, &current, &rhs)?
                    }
                    None => self.evaluate(value)?,
                };
                self.set_property(&target, name, new_value.clone())?;
                self.runtime.collector().track_store(&target, &new_value);
                Ok(new_value)
            }

            Expr::Index { object, index, .. } => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                read_index(&object, &index, false)
            }

            Expr::IndexSet {
                object,
                index,
                op,
                value,
                ..
            } => {
                let target = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                let new_value = self.assigned_value(*op, || read_index(&target, &index, true), value)?;
                write_index(&target, &index, new_value.clone())?;
                self.runtime.collector().track_store(&target, &new_value);
                Ok(new_value)
            }

            Expr::List { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.evaluate(element)?);
                }
                Ok(Value::list(items))
            }

            Expr::Map { entries, .. } => {
                let mut fields = IndexMap::new();
                for (key, expr) in entries {
                    let value = self.evaluate(expr)?;
                    fields.insert(key.clone(), value);
                }
                Ok(Value::object(fields))
            }

            Expr::Interpolated { parts, .. } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr(expr) => {
                            let value = self.evaluate(expr)?;
                            out.push_str(&value.to_string());
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }

    /// Value stored by an index assignment: the right-hand side, or the
    /// current value combined with it for compound operators
    fn assigned_value(
        &mut self,
        op: AssignOp,
        current: impl FnOnce() -> Result<Value>,
        value: &Expr,
    ) -> Result<Value> {
        match op.binary() {
            Some(bin) => {
                let current = current()?;
                let rhs = self.evaluate(value)?;
                binary_op(bin, &current, &rhs)
            }
            None => self.evaluate(value),
        }
    }

    /// Call any callable value
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, None, args),
            Value::Native(native) => {
                native.check_arity(args.len())?;
                trace!(native = %native.name, args = args.len(), "native call");
                let func = native.func.clone();
                func(self, &args)
            }
            Value::BoundMethod(bound) => {
                self.call_function(&bound.method, Some(bound.receiver.clone()), args)
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::HostClass(class) => Ok(Value::Host(dispatch::construct(class, &args)?)),
            Value::HostMethod(method) => dispatch::call_host_method(self, method, args),
            other => Err(KestrelError::new(
                ErrorKind::NotCallable(other.type_name().to_string()),
                None,
            )),
        }
    }

    /// Call a script function. Missing arguments bind to null and extra
    /// arguments are ignored.
    pub fn call_function(
        &mut self,
        function: &ScriptFunction,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let _depth = CallDepth::enter(self.runtime.config().max_call_depth)?;

        let scope = Scope::with_parent(&function.closure);
        if let Some(this) = this {
            scope.define("this", this)?;
        }
        let mut args = args.into_iter();
        for param in &function.decl.params {
            scope.define(param.clone(), args.next().unwrap_or(Value::Null))?;
        }

        let saved = (self.loop_depth, self.switch_depth);
        self.loop_depth = 0;
        self.switch_depth = 0;
        self.function_depth += 1;

        let result = ensure_sufficient_stack(|| self.execute_block(&function.decl.body, scope));

        self.function_depth -= 1;
        (self.loop_depth, self.switch_depth) = saved;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    /// Property read; unknown properties read as null
    pub fn get_property(&mut self, object: &Value, name: &str) -> Result<Value> {
        self.read_property(object, name, false)
    }

    fn read_property(&mut self, object: &Value, name: &str, strict: bool) -> Result<Value> {
        let found = match object {
            Value::Object(obj) => {
                if let Some(value) = obj.get_field(name) {
                    Some(value)
                } else if let Some(value) = obj.baked.get(&accessor_name("get", name)) {
                    Some(value.clone())
                } else if let Some(value) = obj.baked.get(name) {
                    Some(constant_getter(name, value.clone()))
                } else {
                    obj.class.as_ref().and_then(|class| class.find_method(name)).map(|method| {
                        Value::BoundMethod(Arc::new(BoundMethod {
                            receiver: object.clone(),
                            method,
                        }))
                    })
                }
            }
            Value::String(s) if name == "length" => Some(Value::Number(s.chars().count() as f64)),
            Value::List(items) if name == "length" => Some(Value::Number(items.read().len() as f64)),
            Value::String(_) | Value::List(_) => None,
            Value::Host(host) => return dispatch::get_property(self, host, name),
            Value::HostClass(class) => return dispatch::get_static(class, name),
            other => {
                return Err(type_error(format!(
                    "only objects have properties, cannot read '{}' of {}",
                    name,
                    other.type_name()
                )))
            }
        };
        match found {
            Some(value) => Ok(value),
            None if strict => Err(KestrelError::runtime(format!("undefined property '{}'", name), None)),
            None => Ok(Value::Null),
        }
    }

    pub fn set_property(&mut self, object: &Value, name: &str, value: Value) -> Result<()> {
        match object {
            Value::Object(obj) => {
                if obj.baked.contains_key(&accessor_name("get", name)) {
                    return Err(KestrelError::new(ErrorKind::ReadOnlyProperty(name.to_string()), None));
                }
                obj.set_field(name, value);
                Ok(())
            }
            Value::Host(host) => dispatch::set_property(self, host, name, value),
            Value::HostClass(_) => Err(KestrelError::new(
                ErrorKind::UnwritableProperty(name.to_string()),
                None,
            )),
            other => Err(type_error(format!(
                "only objects have fields, cannot set '{}' on {}",
                name,
                other.type_name()
            ))),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.runtime.collector().leave();
    }
}

fn type_error(message: String) -> KestrelError {
    KestrelError::new(ErrorKind::TypeMismatch(message), None)
}

/// The object bound by `catch (e)`: `{message, line}`
fn error_value(err: &KestrelError) -> Value {
    let mut fields = IndexMap::new();
    fields.insert("message".to_string(), Value::String(err.message()));
    fields.insert("line".to_string(), Value::Number(err.line() as f64));
    Value::object(fields)
}

fn error_line(error: &Value) -> f64 {
    match error {
        Value::Object(obj) => obj.get_field("line").and_then(|v| v.as_number()).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn constant_getter(name: &str, value: Value) -> Value {
    Value::Native(Arc::new(NativeFunction::new(name, 0..=0, move |_, _| {
        Ok(value.clone())
    })))
}

fn iteration_items(iterable: &Value) -> Result<Vec<Value>> {
    match iterable {
        Value::List(items) => Ok(items.read().clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Object(obj) => Ok(obj.field_names().into_iter().map(Value::String).collect()),
        other => Err(type_error(format!(
            "can only iterate over lists, strings and objects, got {}",
            other.type_name()
        ))),
    }
}

fn list_index(index: &Value) -> Result<i64> {
    index.as_index().ok_or_else(|| {
        type_error(format!(
            "list index must be an integer, got {}",
            index.repr()
        ))
    })
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Index read. Out-of-range reads yield null unless `strict`.
fn read_index(object: &Value, index: &Value, strict: bool) -> Result<Value> {
    match object {
        Value::List(items) => {
            let i = list_index(index)?;
            let items = items.read();
            let found = usize::try_from(i).ok().and_then(|i| items.get(i)).cloned();
            match found {
                Some(value) => Ok(value),
                None if strict => Err(KestrelError::new(
                    ErrorKind::IndexOutOfBounds { index: i, len: items.len() },
                    None,
                )),
                None => Ok(Value::Null),
            }
        }
        Value::String(s) => {
            let i = list_index(index)?;
            let found = usize::try_from(i).ok().and_then(|i| s.chars().nth(i));
            match found {
                Some(c) => Ok(Value::String(c.to_string())),
                None if strict => Err(KestrelError::new(
                    ErrorKind::IndexOutOfBounds {
                        index: i,
                        len: s.chars().count(),
                    },
                    None,
                )),
                None => Ok(Value::Null),
            }
        }
        Value::Object(obj) => {
            let key = key_string(index);
            match obj.get_field(&key) {
                Some(value) => Ok(value),
                None if strict => Err(KestrelError::runtime(format!("undefined property '{}'", key), None)),
                None => Ok(Value::Null),
            }
        }
        other => Err(type_error(format!("cannot index into {}", other.type_name()))),
    }
}

/// Index write. Writing one past the end of a list appends.
fn write_index(object: &Value, index: &Value, value: Value) -> Result<()> {
    match object {
        Value::List(items) => {
            let i = list_index(index)?;
            let mut items = items.write();
            let len = items.len();
            match usize::try_from(i) {
                Ok(i) if i < len => items[i] = value,
                Ok(i) if i == len => items.push(value),
                _ => return Err(KestrelError::new(ErrorKind::IndexOutOfBounds { index: i, len }, None)),
            }
            Ok(())
        }
        Value::Object(obj) => {
            let key = key_string(index);
            if obj.baked.contains_key(&accessor_name("get", &key)) {
                return Err(KestrelError::new(ErrorKind::ReadOnlyProperty(key), None));
            }
            obj.set_field(key, value);
            Ok(())
        }
        other => Err(type_error(format!(
            "cannot assign by index into {}",
            other.type_name()
        ))),
    }
}

/// Apply a binary operator
pub fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!("{}{}", left, right))),
            (Value::List(a), Value::List(b)) => {
                let mut items = a.read().clone();
                items.extend(b.read().iter().cloned());
                Ok(Value::list(items))
            }
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Mul => match repeat(left, right)? {
            Some(value) => Ok(value),
            None => arithmetic(op, left, right),
        },
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => arithmetic(op, left, right),
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (a, b) = numeric_operands(op, left, right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            }))
        }
    }
}

fn numeric_operands(op: BinaryOp, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(type_error(format!(
            "operands for '{}' must be numbers, got {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Numeric arithmetic. The result is Float only when both operands are.
fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let (a, b) = numeric_operands(op, left, right)?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(KestrelError::new(ErrorKind::DivisionByZero, None))
        }
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        other => {
            return Err(KestrelError::runtime(
                format!("'{}' is not an arithmetic operator", other),
                None,
            ))
        }
    };
    match (left, right) {
        (Value::Float(_), Value::Float(_)) => Ok(Value::Float(result as f32)),
        _ => Ok(Value::Number(result)),
    }
}

/// `"ab" * 3` and `[1] * 2` with an integral Number count. Negative
/// counts repeat zero times.
fn repeat(left: &Value, right: &Value) -> Result<Option<Value>> {
    let (count, operand) = match (left, right) {
        (Value::Number(n), other @ (Value::String(_) | Value::List(_))) => (*n, other),
        (other @ (Value::String(_) | Value::List(_)), Value::Number(n)) => (*n, other),
        _ => return Ok(None),
    };
    if count.fract() != 0.0 || !count.is_finite() {
        return Ok(None);
    }
    let count = count.max(0.0) as usize;
    let too_large = || KestrelError::runtime("repetition result is too large", None);
    match operand {
        Value::String(s) => {
            let total = s.len().checked_mul(count).ok_or_else(too_large)?;
            if total == 0 {
                return Ok(Some(Value::string("")));
            }
            let mut out = String::new();
            out.try_reserve(total).map_err(|_| too_large())?;
            for _ in 0..count {
                out.push_str(s);
            }
            Ok(Some(Value::String(out)))
        }
        Value::List(items) => {
            let items = items.read().clone();
            let total = items.len().checked_mul(count).ok_or_else(too_large)?;
            if total == 0 {
                return Ok(Some(Value::list(Vec::new())));
            }
            let mut out = Vec::new();
            out.try_reserve(total).map_err(|_| too_large())?;
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Some(Value::list(out)))
        }
        _ => Ok(None),
    }
}
